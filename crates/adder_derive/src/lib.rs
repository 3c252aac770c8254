use proc_macro::TokenStream;

mod function;

/// Wraps a plain Rust function taking typed arguments into the native
/// function ABI the VM expects: `fn(&mut Vm, &[Value]) -> Result<Value>`.
///
/// ```ignore
/// #[native]
/// fn add(a: i64, b: i64) -> i64 {
///   a + b
/// }
/// ```
///
/// expands to a function with the same name whose signature matches
/// `NativeFn`, checking arity, converting each argument with
/// [`FromValue`], and converting the return value with [`IntoValue`].
#[proc_macro_attribute]
pub fn native(args: TokenStream, input: TokenStream) -> TokenStream {
  function::macro_impl(args, input)
}
