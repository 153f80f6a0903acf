//! Expansion for `#[rpc_method]` (§4.5, §10.5).
//!
//! Classification is syntactic, the same way `#[handler]` matches a salvo handler's parameters by
//! type name rather than by runtime reflection: the macro looks at the shape of the annotated
//! function's parameter list and picks one of the four call-shape traits to implement. The
//! function body is lifted into a unit struct's inherent `call` method, exactly as `#[handler]`
//! lifts a free function into a struct implementing `Handler`.

use proc_macro2::TokenStream;
use proc_macro_crate::{crate_name, FoundCrate};
use quote::quote;
use syn::{FnArg, Ident, Item, ItemFn, Pat, PatType, Type};

fn swill_core_crate() -> Ident {
    match crate_name("swill_core") {
        Ok(FoundCrate::Itself) => Ident::new("crate", proc_macro2::Span::call_site()),
        Ok(FoundCrate::Name(name)) => Ident::new(&name, proc_macro2::Span::call_site()),
        Err(_) => Ident::new("swill_core", proc_macro2::Span::call_site()),
    }
}

fn type_name(ty: &Type) -> Option<String> {
    match ty {
        Type::Path(path) => path.path.segments.last().map(|seg| seg.ident.to_string()),
        Type::Reference(r) => type_name(&r.elem),
        _ => None,
    }
}

/// The four recognized second/third parameter shapes, in the order the macro checks them.
enum Shape {
    UnaryUnary,
    ClientStreamUnary,
    UnaryServerStream,
    Bidi,
}

fn classify(sig: &syn::Signature) -> syn::Result<Shape> {
    let params: Vec<&PatType> = sig
        .inputs
        .iter()
        .filter_map(|arg| match arg {
            FnArg::Typed(p) => Some(p),
            FnArg::Receiver(_) => None,
        })
        .collect();

    // Parameter 0 is always `ctx: &mut Context`; classification looks at what follows it.
    let rest = &params[1..];
    let names: Vec<Option<String>> = rest.iter().map(|p| type_name(&p.ty)).collect();

    match names.as_slice() {
        [Some(second)] if second == "Value" => Ok(Shape::UnaryUnary),
        [Some(second)] if second == "StreamIterator" => Ok(Shape::ClientStreamUnary),
        [Some(second), Some(third)] if second == "Value" && third.contains("OutboundSink") => {
            Ok(Shape::UnaryServerStream)
        }
        [Some(second), Some(third)]
            if second == "StreamIterator" && third.contains("OutboundSink") =>
        {
            Ok(Shape::Bidi)
        }
        _ => Err(syn::Error::new_spanned(
            &sig.inputs,
            "#[rpc_method] requires (ctx: &mut Context, request: Value), \
             (ctx: &mut Context, requests: StreamIterator), \
             (ctx: &mut Context, request: Value, out: Arc<dyn OutboundSink>), or \
             (ctx: &mut Context, requests: StreamIterator, out: Arc<dyn OutboundSink>)",
        )),
    }
}

pub(crate) fn generate(item: Item) -> syn::Result<TokenStream> {
    let Item::Fn(item_fn) = item else {
        return Err(syn::Error::new_spanned(
            quote! {},
            "#[rpc_method] may only be applied to a free function",
        ));
    };
    let ItemFn { attrs, vis, sig, block } = item_fn;
    let core = swill_core_crate();
    let name = &sig.ident;
    let shape = classify(&sig)?;

    let param_idents: Vec<&Ident> = sig
        .inputs
        .iter()
        .filter_map(|arg| match arg {
            FnArg::Typed(PatType { pat, .. }) => match &**pat {
                Pat::Ident(ident) => Some(&ident.ident),
                _ => None,
            },
            FnArg::Receiver(_) => None,
        })
        .collect();
    let ctx_ident = param_idents[0];
    let input_ident = param_idents[1];
    let out_ident = param_idents.get(2).copied();

    let struct_def = quote! {
        #(#attrs)*
        #[allow(non_camel_case_types)]
        #[derive(Debug)]
        #vis struct #name;
    };

    let trait_impl = match shape {
        Shape::UnaryUnary => quote! {
            #[#core::async_trait]
            impl #core::handler::UnaryUnaryHandler for #name {
                async fn call(&self, #ctx_ident: &mut #core::context::Context, #input_ident: rmpv::Value) -> #core::Result<rmpv::Value> {
                    #block
                }
            }
        },
        Shape::ClientStreamUnary => quote! {
            #[#core::async_trait]
            impl #core::handler::ClientStreamUnaryHandler for #name {
                async fn call(&self, #ctx_ident: &mut #core::context::Context, #input_ident: #core::stream::StreamIterator) -> #core::Result<rmpv::Value> {
                    #block
                }
            }
        },
        Shape::UnaryServerStream => {
            let out_ident = out_ident.expect("classified as UnaryServerStream implies a third parameter");
            quote! {
                #[#core::async_trait]
                impl #core::handler::UnaryServerStreamHandler for #name {
                    async fn call(&self, #ctx_ident: &mut #core::context::Context, #input_ident: rmpv::Value, #out_ident: std::sync::Arc<dyn #core::handler::OutboundSink>) -> #core::Result<()> {
                        #block
                    }
                }
            }
        }
        Shape::Bidi => {
            let out_ident = out_ident.expect("classified as Bidi implies a third parameter");
            quote! {
                #[#core::async_trait]
                impl #core::handler::BidiHandler for #name {
                    async fn call(&self, #ctx_ident: &mut #core::context::Context, #input_ident: #core::stream::StreamIterator, #out_ident: std::sync::Arc<dyn #core::handler::OutboundSink>) -> #core::Result<()> {
                        #block
                    }
                }
            }
        }
    };

    Ok(quote! {
        #struct_def
        #trait_impl
    })
}
