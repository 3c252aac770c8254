use proc_macro::TokenStream;
use proc_macro2::{Ident, Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::{FnArg, ItemFn, Pat, ReturnType};

pub fn macro_impl(args: TokenStream, input: TokenStream) -> TokenStream {
  if !args.is_empty() {
    return syn::Error::new(Span::call_site(), "#[native] does not accept any arguments")
      .into_compile_error()
      .into();
  }

  let crate_name = match proc_macro_crate::crate_name("adder") {
    Ok(found) => match found {
      proc_macro_crate::FoundCrate::Itself => format_ident!("crate"),
      proc_macro_crate::FoundCrate::Name(name) => format_ident!("{name}"),
    },
    Err(e) => {
      return syn::Error::new(Span::call_site(), format!("{e}"))
        .into_compile_error()
        .into()
    }
  };

  let input = syn::parse_macro_input!(input as ItemFn);
  match expand(&crate_name, input) {
    Ok(ts) => ts.into(),
    Err(e) => e.into_compile_error().into(),
  }
}

struct Param {
  name: Ident,
  ty: syn::Type,
}

fn expand(crate_name: &Ident, mut input: ItemFn) -> syn::Result<TokenStream2> {
  let outer_name = input.sig.ident.clone();
  let inner_name = format_ident!("__native_impl_{}", outer_name);
  let vis = input.vis.clone();

  let mut params = Vec::new();
  for arg in input.sig.inputs.iter() {
    match arg {
      FnArg::Receiver(r) => {
        return Err(syn::Error::new_spanned(
          r,
          "native functions may not take `self`",
        ))
      }
      FnArg::Typed(pat_ty) => {
        let name = match pat_ty.pat.as_ref() {
          Pat::Ident(p) => p.ident.clone(),
          other => {
            return Err(syn::Error::new_spanned(
              other,
              "native function parameters must be simple identifiers",
            ))
          }
        };
        params.push(Param {
          name,
          ty: (*pat_ty.ty).clone(),
        });
      }
    }
  }

  let arity = params.len();
  let extract: Vec<TokenStream2> = params
    .iter()
    .enumerate()
    .map(|(i, p)| {
      let name = &p.name;
      let ty = &p.ty;
      quote! {
        let #name = <#ty as #crate_name::value::FromValue>::from_value(&args[#i])?;
      }
    })
    .collect();
  let call_args: Vec<&Ident> = params.iter().map(|p| &p.name).collect();

  let has_return = !matches!(input.sig.output, ReturnType::Default);
  input.sig.ident = inner_name.clone();
  let inner_vis = input.vis.clone();
  input.vis = inner_vis;

  let call_and_convert = if has_return {
    quote! {
      let __result = #inner_name(#(#call_args),*);
      #crate_name::value::IntoValue::into_value(__result)
    }
  } else {
    quote! {
      #inner_name(#(#call_args),*);
      Ok(#crate_name::value::Value::Nil)
    }
  };

  Ok(quote! {
    #input

    #[allow(non_snake_case)]
    #vis fn #outer_name(
      vm: &mut #crate_name::vm::Vm,
      args: &[#crate_name::value::Value],
    ) -> #crate_name::Result<#crate_name::value::Value> {
      let _ = vm;
      if args.len() != #arity {
        return Err(#crate_name::error::Error::arity(stringify!(#outer_name), #arity, args.len()));
      }
      #(#extract)*
      #call_and_convert
    }
  })
}
