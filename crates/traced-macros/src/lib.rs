//! Attribute macros for traced. Use them through the `traced` crate, which
//! re-exports them and provides the runtime they expand to.

mod args;
mod expand;
mod impl_block;

use proc_macro::TokenStream;
use syn::{parse_macro_input, ItemFn, ItemImpl};

use args::{ArgsFor, TraceArgs};

/// Traces every call of a function.
///
/// ```ignore
/// #[traced]
/// fn add(a: i64, b: i64) -> i64 { a + b }
///
/// #[traced(name = "load_user", record_results = false, skip(conn))]
/// async fn load(conn: &Pool, id: u64) -> Result<User, DbError> { .. }
/// ```
///
/// Recorded arguments and results must implement `serde::Serialize`; use
/// `skip(..)`, `record_params = false` or `record_results = false` for those
/// that don't.
#[proc_macro_attribute]
pub fn traced(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match TraceArgs::parse(attr.into(), ArgsFor::Function) {
        Ok(args) => args,
        Err(e) => return e.to_compile_error().into(),
    };
    let item = parse_macro_input!(item as ItemFn);
    expand::traced_fn(item, &args)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Traces the public methods of an impl block, recording the implementing
/// type as the span component.
///
/// Methods are skipped when private (in inherent impls), without a `self`
/// receiver, underscore-prefixed, listed in `exclude(..)` or marked
/// `#[not_traced]`. A method-level `#[traced(..)]` overrides the block's
/// options and forces tracing of an otherwise skipped method.
#[proc_macro_attribute]
pub fn traced_impl(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match TraceArgs::parse(attr.into(), ArgsFor::Impl) {
        Ok(args) => args,
        Err(e) => return e.to_compile_error().into(),
    };
    let item = parse_macro_input!(item as ItemImpl);
    impl_block::traced_impl(item, args)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Traces the methods of a type implementing `traced::Traced`, reading
/// exclusions and recording flags from the trait at call time.
///
/// Because `Traced::RECORD_PARAMS` is only known at call time, every
/// recordable argument must implement `Serialize` even when the trait turns
/// parameter recording off. Arguments that cannot be serialized need a
/// method-level `#[traced(record_params = false)]` or `#[traced(skip(..))]`.
///
/// ```ignore
/// struct Pool;
///
/// impl traced::Traced for Pool {
///     const RECORD_PARAMS: bool = false;
/// }
///
/// #[traced_methods]
/// impl Pool {
///     #[traced(skip(conn))]
///     pub fn release(&self, conn: std::net::TcpStream, reason: &str) {}
/// }
/// ```
#[proc_macro_attribute]
pub fn traced_methods(attr: TokenStream, item: TokenStream) -> TokenStream {
    if let Err(e) = TraceArgs::parse(attr.into(), ArgsFor::Methods) {
        return e.to_compile_error().into();
    }
    let item = parse_macro_input!(item as ItemImpl);
    impl_block::traced_methods(item)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Marks a method that `#[traced_impl]` or `#[traced_methods]` must leave alone.
#[proc_macro_attribute]
pub fn not_traced(_attr: TokenStream, item: TokenStream) -> TokenStream {
    item
}
