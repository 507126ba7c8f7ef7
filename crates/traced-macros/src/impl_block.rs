//! `#[traced_impl]` and `#[traced_methods]`: tracing every eligible method of
//! an impl block.

use proc_macro2::TokenStream as TokenStream2;
use quote::{quote, ToTokens};
use syn::{ImplItem, ImplItemFn, ItemImpl, LitStr, Type, Visibility};

use crate::args::{is_attr, TraceArgs};
use crate::expand::{fixed_options, instrument, setters, span_name, Options};

/// How the methods of one impl block are configured.
pub enum ImplMode {
    /// `#[traced_impl]`: options fixed at expansion time.
    Fixed { component: String, args: TraceArgs },
    /// `#[traced_methods]`: options read from the type's `Traced` impl.
    FromTrait,
}

pub fn traced_impl(mut item: ItemImpl, args: TraceArgs) -> syn::Result<TokenStream2> {
    let component = args
        .name
        .as_ref()
        .map(LitStr::value)
        .unwrap_or_else(|| type_name(&item.self_ty));
    for excluded in &args.exclude {
        let found = item.items.iter().any(|it| match it {
            ImplItem::Fn(method) => method.sig.ident == *excluded,
            _ => false,
        });
        if !found {
            return Err(syn::Error::new(
                excluded.span(),
                format!("`{}` is not a method of this impl block", excluded),
            ));
        }
    }
    rewrite(&mut item, &ImplMode::Fixed { component, args })?;
    Ok(item.into_token_stream())
}

pub fn traced_methods(mut item: ItemImpl) -> syn::Result<TokenStream2> {
    rewrite(&mut item, &ImplMode::FromTrait)?;
    Ok(item.into_token_stream())
}

fn rewrite(item: &mut ItemImpl, mode: &ImplMode) -> syn::Result<()> {
    let trait_impl = item.trait_.is_some();
    for impl_item in item.items.iter_mut() {
        let ImplItem::Fn(method) = impl_item else {
            continue;
        };
        rewrite_method(method, mode, trait_impl)?;
    }
    Ok(())
}

fn rewrite_method(method: &mut ImplItemFn, mode: &ImplMode, trait_impl: bool) -> syn::Result<()> {
    let opted_out = method.attrs.iter().any(|a| is_attr(a, "not_traced"));
    let explicit = method
        .attrs
        .iter()
        .find(|a| is_attr(a, "traced"))
        .map(TraceArgs::from_attribute)
        .transpose()?;
    method
        .attrs
        .retain(|a| !is_attr(a, "not_traced") && !is_attr(a, "traced"));

    if opted_out {
        return Ok(());
    }
    let ident = &method.sig.ident;
    let public = trait_impl || !matches!(method.vis, Visibility::Inherited);
    let has_receiver = method.sig.receiver().is_some();
    let eligible = public && has_receiver && !ident.to_string().starts_with('_');
    if !eligible && explicit.is_none() {
        return Ok(());
    }
    if method.sig.constness.is_some() && explicit.is_none() {
        return Ok(());
    }

    let method_args = explicit.unwrap_or_default();
    let (options, effective) = match mode {
        ImplMode::Fixed { component, args } => {
            if args.excludes(ident) {
                return Ok(());
            }
            let effective = TraceArgs {
                name: method_args.name.clone(),
                record_params: method_args.record_params.or(args.record_params),
                record_results: method_args.record_results.or(args.record_results),
                skip: method_args.skip.clone(),
                exclude: Vec::new(),
            };
            let name = span_name(&effective, ident);
            let options = fixed_options(&name, Some(component), &effective);
            (Options::Fixed(options), effective)
        }
        ImplMode::FromTrait => {
            let method_name = ident.to_string();
            let rename = method_args.name.as_ref().map(|lit| {
                quote! { __traced_options.name = ::std::borrow::Cow::Borrowed(#lit); }
            });
            let overrides = setters(&method_args);
            let options = quote! {
                ::traced::TraceOptions::for_method::<Self>(#method_name).map(|__traced_options| {
                    #[allow(unused_mut)]
                    let mut __traced_options = __traced_options #overrides;
                    #rename
                    __traced_options
                })
            };
            (Options::Dynamic(options), method_args)
        }
    };

    let block = instrument(&method.sig, &method.block, options, &effective)?;
    method.block = block;
    Ok(())
}

/// Last path segment of the implementing type, without generics.
fn type_name(ty: &Type) -> String {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|segment| segment.ident.to_string())
            .unwrap_or_else(|| ty.to_token_stream().to_string()),
        _ => ty.to_token_stream().to_string(),
    }
}
