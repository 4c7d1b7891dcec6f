use snafu::Snafu;

/// The error returned when option documents cannot be read or written.
#[derive(Debug, Snafu)]
pub struct Error(OpaqueError);
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum OpaqueError {
    #[snafu(display("Options document does not match the expected schema: {}", source))]
    OptionsDeserialization { source: serde_json::Error },
}
