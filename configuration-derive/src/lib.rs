//! Automatically implement `Configuration` for an option struct.
//!
//! Fields marked `#[node_option]` are the singular options of a default node group. The derived
//! `node_options_set` lists the camelCase names of the marked fields that hold a value.

use proc_macro::{self, TokenStream};

#[macro_use]
extern crate quote;

#[proc_macro_derive(Configuration, attributes(node_option))]
pub fn derive_configuration(input: TokenStream) -> TokenStream {
    let ast: syn::DeriveInput = match syn::parse(input) {
        Ok(ast) => ast,
        Err(e) => return e.to_compile_error().into(),
    };
    let ident = ast.ident;

    let node_options: Vec<(syn::Ident, String)> = match ast.data {
        syn::Data::Struct(data) => data
            .fields
            .into_iter()
            .filter(|field| {
                field
                    .attrs
                    .iter()
                    .any(|attr| attr.path.is_ident("node_option"))
            })
            .filter_map(|field| field.ident)
            .map(|field| {
                let name = camel_case(&field.to_string());
                (field, name)
            })
            .collect(),
        _ => Vec::new(),
    };

    if node_options.is_empty() {
        return quote! {
            impl eks_model::Configuration for #ident {}
        }
        .into();
    }

    let checks = node_options.iter().map(|(field, name)| {
        quote! {
            if self.#field.is_some() {
                set.push(#name);
            }
        }
    });
    quote! {
        impl eks_model::Configuration for #ident {
            fn node_options_set(&self) -> Vec<&'static str> {
                let mut set = Vec::new();
                #(#checks)*
                set
            }
        }
    }
    .into()
}

/// `node_root_volume_size` becomes `nodeRootVolumeSize`, the name users write.
fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper = false;
    for c in snake.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
