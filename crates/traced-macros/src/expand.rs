//! Body rewriting shared by all traced macros.
//!
//! A traced body keeps its signature; only the block changes, so generics,
//! where clauses and attributes pass through untouched.

use proc_macro2::{TokenStream as TokenStream2, TokenTree};
use quote::{quote, ToTokens};
use syn::{Block, FnArg, Ident, ItemFn, Pat, ReturnType, Signature, Type};

use crate::args::TraceArgs;

/// Where a span's options come from.
pub enum Options {
    /// Always traced with these options.
    Fixed(TokenStream2),
    /// An `Option<TraceOptions>` decided at call time; `None` runs untraced.
    Dynamic(TokenStream2),
}

/// Options expression for a span with a literal name and optional component.
pub fn fixed_options(name: &str, component: Option<&str>, args: &TraceArgs) -> TokenStream2 {
    let component = component.map(|c| quote! { .component(#c) });
    let setters = setters(args);
    quote! {
        ::traced::TraceOptions::new(#name) #component #setters
    }
}

/// Builder calls applying explicit `record_params` / `record_results`.
pub fn setters(args: &TraceArgs) -> TokenStream2 {
    let params = args.record_params.map(|r| quote! { .record_params(#r) });
    let results = args.record_results.map(|r| quote! { .record_results(#r) });
    quote! { #params #results }
}

/// Span name for a function: the `name` argument, else the function's name.
pub fn span_name(args: &TraceArgs, ident: &Ident) -> String {
    args.name
        .as_ref()
        .map(|lit| lit.value())
        .unwrap_or_else(|| ident.to_string())
}

/// Rewrites `#[traced]` on a free function (or a lone method).
pub fn traced_fn(mut item: ItemFn, args: &TraceArgs) -> syn::Result<TokenStream2> {
    let name = span_name(args, &item.sig.ident);
    let options = Options::Fixed(fixed_options(&name, None, args));
    let block = instrument(&item.sig, &item.block, options, args)?;
    item.block = Box::new(block);
    Ok(item.into_token_stream())
}

/// Builds the replacement block for a traced body.
pub fn instrument(sig: &Signature, block: &Block, options: Options, args: &TraceArgs) -> syn::Result<Block> {
    if let Some(constness) = sig.constness {
        return Err(syn::Error::new_spanned(constness, "a const fn cannot be traced"));
    }

    let params = capture_params(sig, args);
    let outcome = outcome(&sig.output, args);
    let body = annotated_body(&sig.output, block);

    let traced_call = if sig.asyncness.is_some() {
        quote! {
            ::traced::run_async(
                __traced_options,
                __traced_params,
                async move #body,
                #outcome,
            )
            .await
        }
    } else {
        quote! {
            ::traced::run(
                &__traced_options,
                __traced_params,
                move || #body,
                #outcome,
            )
        }
    };

    // With recording switched off statically, arguments need not be Serialize.
    let params = if args.record_params == Some(false) {
        quote! { ::core::option::Option::None }
    } else {
        quote! {
            if __traced_options.record_params {
                ::core::option::Option::Some(#params)
            } else {
                ::core::option::Option::None
            }
        }
    };
    let traced_branch = quote! {
        let __traced_params = #params;
        #traced_call
    };

    let tokens = match options {
        Options::Fixed(options) => quote! {
            {
                let __traced_options = #options;
                #traced_branch
            }
        },
        Options::Dynamic(options) => quote! {
            {
                match #options {
                    ::core::option::Option::Some(__traced_options) => {
                        #traced_branch
                    }
                    ::core::option::Option::None => #block,
                }
            }
        },
    };
    syn::parse2(tokens)
}

/// `Params` builder over the recordable arguments: named, not skipped and
/// not underscore-prefixed. Receivers are never recorded.
fn capture_params(sig: &Signature, args: &TraceArgs) -> TokenStream2 {
    let recorded = sig.inputs.iter().filter_map(|input| match input {
        FnArg::Typed(typed) => match *typed.pat {
            Pat::Ident(ref pat) => Some(&pat.ident),
            _ => None,
        },
        FnArg::Receiver(_) => None,
    });
    let calls = recorded
        .filter(|ident| !args.skips(ident) && !ident.to_string().starts_with('_'))
        .map(|ident| {
            let key = ident.to_string();
            quote! { .arg(#key, &#ident) }
        });
    quote! {
        ::traced::Params::new() #(#calls)* .finish()
    }
}

/// Closure turning the return value into the span outcome.
fn outcome(output: &ReturnType, args: &TraceArgs) -> TokenStream2 {
    let outcome = quote! { ::traced::__private::SpanOutcome };
    match (returns_result(output), args.record_results) {
        (true, Some(false)) => quote! {
            |__traced_value, _| #outcome::of_result_status(__traced_value)
        },
        (true, _) => quote! {
            |__traced_value, __traced_record| #outcome::of_result(__traced_value, __traced_record)
        },
        (false, Some(false)) => quote! {
            |_, _| #outcome::ok()
        },
        (false, _) => quote! {
            |__traced_value, __traced_record| #outcome::of_value(__traced_value, __traced_record)
        },
    }
}

/// Wraps the body so its value is checked against the declared return type,
/// which lets `?` inside the closure or async block infer its error type.
fn annotated_body(output: &ReturnType, block: &Block) -> TokenStream2 {
    let ty = match output {
        ReturnType::Default => quote! { () },
        ReturnType::Type(_, ty) if mentions_impl(ty) => return block.to_token_stream(),
        ReturnType::Type(_, ty) => ty.to_token_stream(),
    };
    quote! {
        {
            let __traced_result: #ty = #block;
            __traced_result
        }
    }
}

fn returns_result(output: &ReturnType) -> bool {
    let ReturnType::Type(_, ty) = output else {
        return false;
    };
    match **ty {
        Type::Path(ref path) => path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "Result"),
        _ => false,
    }
}

fn mentions_impl(ty: &Type) -> bool {
    fn scan(tokens: TokenStream2) -> bool {
        tokens.into_iter().any(|tree| match tree {
            TokenTree::Ident(ident) => ident == "impl",
            TokenTree::Group(group) => scan(group.stream()),
            _ => false,
        })
    }
    scan(ty.to_token_stream())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::ArgsFor;

    fn expand(item: TokenStream2, args: TokenStream2) -> String {
        let args = TraceArgs::parse(args, ArgsFor::Function).unwrap();
        let item: ItemFn = syn::parse2(item).unwrap();
        traced_fn(item, &args).unwrap().to_string().replace(' ', "")
    }

    #[test]
    fn test_sync_fn_records_named_args() {
        let out = expand(quote! { fn add(a: i64, b: i64) -> i64 { a + b } }, quote! {});
        assert!(out.contains("::traced::run("));
        assert!(out.contains(".arg(\"a\",&a)"));
        assert!(out.contains("of_value"));
        assert!(out.contains("TraceOptions::new(\"add\")"));
    }

    #[test]
    fn test_result_fn_uses_result_outcome() {
        let out = expand(
            quote! { fn parse(s: &str) -> Result<u8, ParseError> { s.parse() } },
            quote! { record_results = false },
        );
        assert!(out.contains("of_result_status"));
        assert!(out.contains(".record_results(false)"));
    }

    #[test]
    fn test_async_fn_uses_run_async() {
        let out = expand(
            quote! { async fn fetch(id: u32, _token: String) -> String { id.to_string() } },
            quote! { name = "fetch_user", skip(id) },
        );
        assert!(out.contains("run_async"));
        assert!(out.contains(".await"));
        assert!(out.contains("\"fetch_user\""));
        assert!(!out.contains(".arg("));
    }

    #[test]
    fn test_impl_return_type_is_not_annotated() {
        let out = expand(
            quote! { fn evens() -> impl Iterator<Item = u32> { (0..10).filter(|n| n % 2 == 0) } },
            quote! { record_results = false },
        );
        assert!(!out.contains("__traced_result"));
    }

    #[test]
    fn test_const_fn_is_rejected() {
        let item: ItemFn = syn::parse_quote! { const fn one() -> u8 { 1 } };
        assert!(traced_fn(item, &TraceArgs::default()).is_err());
    }

    #[test]
    fn test_returns_result() {
        assert!(returns_result(&syn::parse_quote!(-> std::io::Result<()>)));
        assert!(returns_result(&syn::parse_quote!(-> Result<u8, E>)));
        assert!(!returns_result(&syn::parse_quote!(-> Option<u8>)));
        assert!(!returns_result(&ReturnType::Default));
    }
}
