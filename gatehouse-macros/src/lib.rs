use proc_macro::TokenStream;
use quote::quote;
use syn::{
    parse_macro_input, Data, DeriveInput, Ident, ImplItem, ImplItemFn, ItemImpl, Stmt,
    Variant, Visibility,
};

/// Procedural macro that turns an enum into a gatehouse error type.
///
/// This macro automatically:
/// 1. Adds `#[derive(Debug, thiserror::Error, uniffi::Error)]` and `#[uniffi(flat_error)]`
/// 2. Adds a `Generic { message: String }` variant if not already present
/// 3. Implements `From<anyhow::Error>` for the error type
/// 4. With `#[gatehouse_error(foreign)]`, implements `From<uniffi::UnexpectedUniFFICallbackError>`
///    so the enum can be returned by foreign trait implementations
///
/// # Usage
///
/// ```rust,ignore
/// #[gatehouse_error(foreign)]
/// pub enum ProfileStoreError {
///     #[error("profile store unavailable: {reason}")]
///     Unavailable { reason: String },
/// }
/// ```
#[proc_macro_attribute]
pub fn gatehouse_error(args: TokenStream, input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let foreign = match parse_error_args(args) {
        Ok(foreign) => foreign,
        Err(err) => return err.to_compile_error().into(),
    };

    let Data::Enum(data_enum) = &input.data else {
        return syn::Error::new_spanned(&input, "gatehouse_error can only be applied to enums")
            .to_compile_error()
            .into();
    };

    let enum_name = &input.ident;
    let visibility = &input.vis;
    let generics = &input.generics;

    // Existing derive / uniffi attributes would clash with the ones added below
    let attrs: Vec<_> = input
        .attrs
        .iter()
        .filter(|attr| !attr.path().is_ident("derive") && !attr.path().is_ident("uniffi"))
        .collect();

    let mut variants = data_enum.variants.clone();
    if !variants.iter().any(|variant| variant.ident == "Generic") {
        let generic_variant: Variant = syn::parse_quote! {
            /// A generic error that can wrap any anyhow error.
            #[error("Generic error: {message}")]
            Generic {
                /// The error message from the wrapped error.
                message: String
            }
        };
        variants.push(generic_variant);
    }

    let foreign_impl = if foreign {
        quote! {
            impl #generics From<uniffi::UnexpectedUniFFICallbackError> for #enum_name #generics {
                fn from(error: uniffi::UnexpectedUniFFICallbackError) -> Self {
                    Self::Generic {
                        message: format!("unexpected error in foreign callback: {}", error.reason),
                    }
                }
            }
        }
    } else {
        quote! {}
    };

    quote! {
        #[derive(Debug, thiserror::Error, uniffi::Error)]
        #[uniffi(flat_error)]
        #(#attrs)*
        #visibility enum #enum_name #generics {
            #variants
        }

        impl #generics From<anyhow::Error> for #enum_name #generics {
            fn from(err: anyhow::Error) -> Self {
                Self::Generic {
                    message: {
                        let mut message = err.to_string();
                        let chain: Vec<String> = err.chain().skip(1).map(|e| e.to_string()).collect();
                        if !chain.is_empty() {
                            message.push_str(" (caused by: ");
                            message.push_str(&chain.join(" -> "));
                            message.push(')');
                        }
                        message
                    }
                }
            }
        }

        #foreign_impl
    }
    .into()
}

/// Returns `true` when the attribute was invoked as `#[gatehouse_error(foreign)]`.
fn parse_error_args(args: TokenStream) -> syn::Result<bool> {
    if args.is_empty() {
        return Ok(false);
    }
    let ident: Ident = syn::parse(args)?;
    if ident == "foreign" {
        Ok(true)
    } else {
        Err(syn::Error::new_spanned(
            ident,
            "expected `foreign` or no arguments",
        ))
    }
}

/// Procedural macro that wraps `uniffi::export` and automatically injects logging context
///
/// This macro automatically:
/// 1. Forwards the attribute to `#[uniffi::export]`
/// 2. Injects `let _gatehouse_logger_ctx = crate::primitives::logger::LogContext::new("TypeName");`
///    at the start of every `pub fn`
/// 3. Runs the body of every `pub async fn` inside a task-local log context scope, so the
///    prefix survives `.await` points even when the task hops threads
/// 4. Automatically adds `async_runtime = "tokio"` if any async functions are detected
///
/// # Usage
///
/// ```rust,ignore
/// #[gatehouse_export]
/// impl AuthFlow {
///     pub fn state(&self) -> AuthState {
///         debug!("prefixed with [Gatehouse][AuthFlow]");
///         self.reconciler.state()
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn gatehouse_export(args: TokenStream, input: TokenStream) -> TokenStream {
    let input_impl = parse_macro_input!(input as ItemImpl);

    let type_name = match &*input_impl.self_ty {
        syn::Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .map_or_else(|| "Unknown".to_string(), |segment| segment.ident.to_string()),
        _ => "Unknown".to_string(),
    };

    let has_async_functions = has_async_functions_in_impl(&input_impl.items);

    let new_items = input_impl
        .items
        .iter()
        .map(|item| match item {
            ImplItem::Fn(method) if matches!(method.vis, Visibility::Public(_)) => {
                let mut new_method = method.clone();
                inject_logging_context(&mut new_method, &type_name);
                ImplItem::Fn(new_method)
            }
            _ => item.clone(),
        })
        .collect();

    let new_impl = ItemImpl {
        items: new_items,
        ..input_impl
    };

    let mut args = proc_macro2::TokenStream::from(args);
    if has_async_functions {
        args = if args.is_empty() {
            quote! { async_runtime = "tokio" }
        } else {
            quote! { #args, async_runtime = "tokio" }
        };
    }

    quote! {
        #[uniffi::export(#args)]
        #new_impl
    }
    .into()
}

/// Check if any public functions in the impl items are async
fn has_async_functions_in_impl(impl_items: &[ImplItem]) -> bool {
    impl_items.iter().any(|item| {
        if let ImplItem::Fn(method) = item {
            matches!(method.vis, Visibility::Public(_)) && method.sig.asyncness.is_some()
        } else {
            false
        }
    })
}

/// Inject logging context at the start of a function body
fn inject_logging_context(method: &mut ImplItemFn, type_name: &str) {
    if method.sig.asyncness.is_some() {
        let block = method.block.clone();
        method.block = syn::parse_quote! {{
            crate::primitives::logger::LOG_CONTEXT
                .scope(::std::cell::RefCell::new(None), async move {
                    let _gatehouse_logger_ctx = crate::primitives::logger::LogContext::new(#type_name);
                    #block
                })
                .await
        }};
        return;
    }

    let context_stmt: Stmt = syn::parse_quote! {
        let _gatehouse_logger_ctx = crate::primitives::logger::LogContext::new(#type_name);
    };
    method.block.stmts.insert(0, context_stmt);
}
