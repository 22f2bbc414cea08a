//! Derive macros for the bindlet container
//!
//! The RPC engine needs to know the shape of every parameter and return type:
//! which properties a structured value has, which constants an enum declares.
//! These macros generate that description as an `RpcType` implementation.
//!
//! # Available Macros
//!
//! - `#[derive(RpcBean)]` - Describes a struct with named fields as a bean
//! - `#[derive(RpcEnum)]` - Describes a unit-only enum by its constants
//!
//! # Example
//!
//! ```ignore
//! use bindlet_rpc::{RpcBean, RpcEnum, RpcType};
//!
//! #[derive(RpcEnum)]
//! enum Priority {
//!     Low,
//!     #[rpc(rename = "URGENT")]
//!     High,
//! }
//!
//! #[derive(RpcBean)]
//! #[rpc(name = "Ticket")]
//! struct TicketForm {
//!     title: String,
//!     priority: Priority,
//!     #[rpc(read_only)]
//!     id: Option<i64>,
//! }
//!
//! let ty = TicketForm::value_type();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, GenericParam, LitStr, parse_macro_input, parse_quote};

/// Options collected from `#[rpc(...)]` attributes
#[derive(Default)]
struct RpcOptions {
    name: Option<String>,
    rename: Option<String>,
    skip: bool,
    read_only: bool,
}

impl RpcOptions {
    fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut options = Self::default();
        for attr in attrs.iter().filter(|attr| attr.path().is_ident("rpc")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    options.name = Some(meta.value()?.parse::<LitStr>()?.value());
                } else if meta.path.is_ident("rename") {
                    options.rename = Some(meta.value()?.parse::<LitStr>()?.value());
                } else if meta.path.is_ident("skip") {
                    options.skip = true;
                } else if meta.path.is_ident("read_only") {
                    options.read_only = true;
                } else {
                    return Err(meta.error("unknown rpc attribute"));
                }
                Ok(())
            })?;
        }
        Ok(options)
    }
}

/// Derive macro for bean structs
///
/// Generates `bindlet_rpc::RpcType` returning a `ValueType::Bean` whose
/// properties are the struct's fields, typed after each field's own
/// `RpcType`. Generic type parameters get an `RpcType` bound.
///
/// # Attributes
///
/// - `#[rpc(name = "...")]` on the struct - Bean type name (default: the struct name)
/// - `#[rpc(rename = "...")]` on a field - Property name (default: the field name)
/// - `#[rpc(read_only)]` on a field - Never populated by the converter
/// - `#[rpc(skip)]` on a field - Not a property
///
/// # Panics
///
/// This macro will produce a compile error (not a runtime panic) if:
/// - Applied to anything but a struct with named fields
/// - An `#[rpc(...)]` attribute is malformed
#[proc_macro_derive(RpcBean, attributes(rpc))]
pub fn derive_rpc_bean(input: TokenStream) -> TokenStream {
    let mut input = parse_macro_input!(input as DeriveInput);

    let Data::Struct(data_struct) = &input.data else {
        return syn::Error::new_spanned(&input, "#[derive(RpcBean)] can only be used on structs")
            .to_compile_error()
            .into();
    };
    let Fields::Named(fields) = &data_struct.fields else {
        return syn::Error::new_spanned(&input, "#[derive(RpcBean)] requires named fields")
            .to_compile_error()
            .into();
    };

    let container = match RpcOptions::parse(&input.attrs) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };
    let type_name = container.name.unwrap_or_else(|| input.ident.to_string());

    let mut properties = Vec::new();
    for field in &fields.named {
        let options = match RpcOptions::parse(&field.attrs) {
            Ok(options) => options,
            Err(err) => return err.to_compile_error().into(),
        };
        if options.skip {
            continue;
        }
        let Some(ident) = &field.ident else {
            continue;
        };
        let property = options.rename.unwrap_or_else(|| ident.to_string());
        let ty = &field.ty;
        let constructor = if options.read_only {
            quote! { read_only }
        } else {
            quote! { new }
        };
        properties.push(quote! {
            .property(::bindlet_rpc::PropertyDescriptor::#constructor(
                #property,
                <#ty as ::bindlet_rpc::RpcType>::value_type(),
            ))
        });
    }

    add_rpc_bounds(&mut input);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::bindlet_rpc::RpcType for #name #ty_generics #where_clause {
            fn value_type() -> ::bindlet_rpc::ValueType {
                ::bindlet_rpc::ValueType::Bean(
                    ::bindlet_rpc::BeanType::new(#type_name)
                        #(#properties)*
                )
            }
        }
    };

    TokenStream::from(expanded)
}

/// Derive macro for unit-only enums
///
/// Generates `bindlet_rpc::RpcType` returning a `ValueType::Enum` whose
/// constants are the variant names. Incoming text must match a constant
/// exactly, so keep the names in line with the enum's serde representation.
///
/// # Attributes
///
/// - `#[rpc(name = "...")]` on the enum - Enum type name (default: the enum name)
/// - `#[rpc(rename = "...")]` on a variant - Constant name (default: the variant name)
///
/// # Panics
///
/// This macro will produce a compile error (not a runtime panic) if:
/// - Applied to a non-enum type
/// - A variant carries fields
#[proc_macro_derive(RpcEnum, attributes(rpc))]
pub fn derive_rpc_enum(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let Data::Enum(data_enum) = &input.data else {
        return syn::Error::new_spanned(&input, "#[derive(RpcEnum)] can only be used on enums")
            .to_compile_error()
            .into();
    };

    let container = match RpcOptions::parse(&input.attrs) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };
    let type_name = container.name.unwrap_or_else(|| name.to_string());

    let mut constants = Vec::new();
    for variant in &data_enum.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return syn::Error::new_spanned(variant, "#[derive(RpcEnum)] variants cannot carry fields")
                .to_compile_error()
                .into();
        }
        match RpcOptions::parse(&variant.attrs) {
            Ok(options) => constants.push(options.rename.unwrap_or_else(|| variant.ident.to_string())),
            Err(err) => return err.to_compile_error().into(),
        }
    }

    let count = constants.len();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::bindlet_rpc::RpcType for #name #ty_generics #where_clause {
            fn value_type() -> ::bindlet_rpc::ValueType {
                let constants: [&str; #count] = [#(#constants),*];
                ::bindlet_rpc::ValueType::Enum(::bindlet_rpc::EnumType::new(#type_name, constants))
            }
        }
    };

    TokenStream::from(expanded)
}

/// Require `RpcType` of every type parameter
fn add_rpc_bounds(input: &mut DeriveInput) {
    for param in &mut input.generics.params {
        if let GenericParam::Type(type_param) = param {
            type_param.bounds.push(parse_quote!(::bindlet_rpc::RpcType));
        }
    }
}
