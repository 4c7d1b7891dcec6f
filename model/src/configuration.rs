use crate::error::{self, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use snafu::ResultExt;
use std::fmt::Debug;

/// The `Configuration` trait is for the option structs that make up the user-facing surface of
/// the cluster composite. Options arrive as untyped documents (YAML or JSON) and are strongly typed
/// through this trait.
///
/// The traits aggregated by the `Configuration` trait are typical of "plain old data" types.
pub trait Configuration:
    Serialize + DeserializeOwned + Clone + Debug + Default + Send + Sync + Sized + 'static
{
    /// The camelCase names of the singular node group options that hold a value. Only the cluster
    /// options carry such fields; they are marked `#[node_option]`.
    fn node_options_set(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Deserialize the `Configuration` object from a serde `Value`.
    fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value).context(error::OptionsDeserializationSnafu)?)
    }

    /// Deserialize the `Configuration` object from a JSON string.
    fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s).context(error::OptionsDeserializationSnafu)?)
    }
}
