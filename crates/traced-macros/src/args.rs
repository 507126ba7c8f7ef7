//! Attribute argument parsing shared by the traced macros.

use proc_macro2::TokenStream as TokenStream2;
use syn::meta::ParseNestedMeta;
use syn::parse::Parser;
use syn::{Attribute, Error, Ident, LitBool, LitStr, Meta};

/// Arguments accepted by `#[traced(..)]`, `#[traced_impl(..)]` and
/// `#[traced_methods(..)]`. Which keys are allowed depends on the macro.
#[derive(Debug, Default)]
pub struct TraceArgs {
    pub name: Option<LitStr>,
    pub record_params: Option<bool>,
    pub record_results: Option<bool>,
    pub skip: Vec<Ident>,
    pub exclude: Vec<Ident>,
}

/// Keys each macro accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgsFor {
    Function,
    Impl,
    Methods,
}

impl ArgsFor {
    fn allows(self, key: &str) -> bool {
        match self {
            ArgsFor::Function => matches!(key, "name" | "record_params" | "record_results" | "skip"),
            ArgsFor::Impl => matches!(key, "name" | "record_params" | "record_results" | "exclude"),
            ArgsFor::Methods => false,
        }
    }
}

impl TraceArgs {
    pub fn parse(tokens: TokenStream2, target: ArgsFor) -> syn::Result<Self> {
        let mut args = Self::default();
        let parser = syn::meta::parser(|meta| args.parse_meta(meta, target));
        parser.parse2(tokens)?;
        Ok(args)
    }

    /// Reads a per-method `#[traced]` / `#[traced(..)]` attribute.
    pub fn from_attribute(attr: &Attribute) -> syn::Result<Self> {
        match attr.meta {
            Meta::List(ref list) => Self::parse(list.tokens.clone(), ArgsFor::Function),
            Meta::Path(_) => Ok(Self::default()),
            Meta::NameValue(ref nv) => Err(Error::new_spanned(nv, "expected #[traced] or #[traced(..)]")),
        }
    }

    fn parse_meta(&mut self, meta: ParseNestedMeta, target: ArgsFor) -> syn::Result<()> {
        let key = meta
            .path
            .get_ident()
            .map(|ident| ident.to_string())
            .unwrap_or_default();
        if !target.allows(&key) {
            return Err(meta.error(unsupported_message(target)));
        }

        match key.as_str() {
            "name" => {
                let lit: LitStr = meta.value()?.parse()?;
                check_name(&lit)?;
                self.name = Some(lit);
            }
            "record_params" => {
                let lit: LitBool = meta.value()?.parse()?;
                self.record_params = Some(lit.value);
            }
            "record_results" => {
                let lit: LitBool = meta.value()?.parse()?;
                self.record_results = Some(lit.value);
            }
            "skip" => meta.parse_nested_meta(|inner| {
                self.skip.push(nested_ident(&inner)?);
                Ok(())
            })?,
            _ => meta.parse_nested_meta(|inner| {
                self.exclude.push(nested_ident(&inner)?);
                Ok(())
            })?,
        }
        Ok(())
    }

    pub fn excludes(&self, method: &Ident) -> bool {
        self.exclude.iter().any(|e| e == method)
    }

    pub fn skips(&self, arg: &Ident) -> bool {
        self.skip.iter().any(|s| s == arg)
    }
}

fn unsupported_message(target: ArgsFor) -> &'static str {
    match target {
        ArgsFor::Function => {
            "unsupported argument; expected `name`, `record_params`, `record_results` or `skip`"
        }
        ArgsFor::Impl => {
            "unsupported argument; expected `name`, `exclude`, `record_params` or `record_results`"
        }
        ArgsFor::Methods => {
            "#[traced_methods] takes no arguments; configure the type through its `Traced` impl"
        }
    }
}

fn nested_ident(meta: &ParseNestedMeta) -> syn::Result<Ident> {
    meta.path
        .get_ident()
        .cloned()
        .ok_or_else(|| meta.error("expected a plain identifier"))
}

fn check_name(lit: &LitStr) -> syn::Result<()> {
    let name = lit.value();
    if name.is_empty() {
        return Err(Error::new(lit.span(), "traced name must not be empty"));
    }
    if name.trim() != name || name.chars().any(char::is_control) {
        return Err(Error::new(
            lit.span(),
            "traced name must not have surrounding whitespace or control characters",
        ));
    }
    Ok(())
}

/// Whether `attr` is `#[<name>]` or `#[<path>::<name>]`.
pub fn is_attr(attr: &Attribute, name: &str) -> bool {
    attr.path()
        .segments
        .last()
        .is_some_and(|segment| segment.ident == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quote::quote;

    #[test]
    fn test_parse_function_args() {
        let args = TraceArgs::parse(
            quote! { name = "load", record_params = false, skip(conn, token) },
            ArgsFor::Function,
        )
        .unwrap();
        assert_eq!(args.name.unwrap().value(), "load");
        assert_eq!(args.record_params, Some(false));
        assert_eq!(args.record_results, None);
        assert_eq!(args.skip.len(), 2);
    }

    #[test]
    fn test_parse_impl_args() {
        let args = TraceArgs::parse(quote! { exclude(reset, helper) }, ArgsFor::Impl).unwrap();
        let reset: Ident = syn::parse_quote!(reset);
        assert!(args.excludes(&reset));
    }

    #[test]
    fn test_rejects_bad_args() {
        assert!(TraceArgs::parse(quote! { name = "" }, ArgsFor::Function).is_err());
        assert!(TraceArgs::parse(quote! { name = " x" }, ArgsFor::Function).is_err());
        assert!(TraceArgs::parse(quote! { exclude(a) }, ArgsFor::Function).is_err());
        assert!(TraceArgs::parse(quote! { skip(a) }, ArgsFor::Impl).is_err());
        assert!(TraceArgs::parse(quote! { name = "x" }, ArgsFor::Methods).is_err());
        assert!(TraceArgs::parse(quote! { record_params = "no" }, ArgsFor::Function).is_err());
        assert!(TraceArgs::parse(quote! { exclude(a::b) }, ArgsFor::Impl).is_err());
    }

    #[test]
    fn test_attribute_forms() {
        let bare: Attribute = syn::parse_quote!(#[traced]);
        assert!(TraceArgs::from_attribute(&bare).unwrap().name.is_none());
        let listed: Attribute = syn::parse_quote!(#[traced(record_results = false)]);
        assert_eq!(TraceArgs::from_attribute(&listed).unwrap().record_results, Some(false));
        let pathed: Attribute = syn::parse_quote!(#[traced::not_traced]);
        assert!(is_attr(&pathed, "not_traced"));
    }
}
