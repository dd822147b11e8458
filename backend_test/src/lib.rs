use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Things a test may ask to have injected, by type name.
const INJECTABLE: [&str; 4] = ["Client", "Ledger", "MemoryStore", "ElectionController"];

/// Transform an asynchronous test into a synchronous one, inject dependencies,
/// and ensure that the test's ledger directory is removed regardless of how
/// the test terminates.
///
/// Each test gets a server of its own, whose ledger, backups and example
/// roster live in a fresh temporary directory and whose remote store is an
/// in-memory one. Injectable dependencies are
/// [`rocket::local::asynchronous::Client`], [`crate::model::ledger::Ledger`],
/// [`crate::sync::MemoryStore`] and [`crate::election::ElectionController`].
///
/// Pass `admin` or `voter` to have the client logged in before the test runs.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract type information and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone()) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Log in the client as admin/voter if needed.
    let maybe_login = parse_macro_input!(args as Option<Ident>)
        .and_then(|arg| {
            if arg == "admin" {
                Some(quote! {
                    let response = rocket_client
                        .post(uri!(crate::api::auth::authenticate_admin))
                        .header(rocket::http::ContentType::JSON)
                        .body(rocket::serde::json::json!(crate::model::auth::AdminCredentials::example()).to_string())
                        .dispatch()
                        .await;
                    assert_eq!(response.status(), rocket::http::Status::Ok, "admin login failed");
                    drop(response);
                })
            } else if arg == "voter" {
                Some(quote! {
                    let response = rocket_client
                        .post(uri!(crate::api::auth::authenticate_voter))
                        .header(rocket::http::ContentType::JSON)
                        .body(rocket::serde::json::json!(crate::model::auth::VoterCredentials::example()).to_string())
                        .dispatch()
                        .await;
                    assert_eq!(response.status(), rocket::http::Status::Ok, "voter login failed");
                    drop(response);
                })
            } else {
                None
            }
        })
        .unwrap_or_default();

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// Test setup.
            async fn setup(dir: &std::path::Path) -> (rocket::local::asynchronous::Client, crate::sync::MemoryStore) {
                log4rs_test_utils::test_logging::init_logging_once_for(
                    ["ballot_ledger"],
                    None,
                    None,
                );

                let store = crate::sync::MemoryStore::new();
                let rocket_client = rocket::local::asynchronous::Client::tracked(crate::rocket_for_test(dir, store.clone()))
                    .await
                    .unwrap();

                #maybe_login

                (rocket_client, store)
            }

            /// The test itself.
            #item_fn

            /// Test cleanup.
            fn cleanup(dir: &std::path::Path) {
                let _ = std::fs::remove_dir_all(dir);
            }

            // Create an async runtime. We need a separate one for inside and
            // outside the `catch_unwind`.
            let outer_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-setup-cleanup")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let inner_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let dir = crate::test_dir();
            let (rocket_client, store) = outer_runtime.block_on(setup(&dir));

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let client_mutex = std::sync::Mutex::new(rocket_client);
            let store_mutex = std::sync::Mutex::new(store);
            let runtime_mutex = std::sync::Mutex::new(inner_runtime);
            let result = std::panic::catch_unwind(|| {
                let rocket_client = client_mutex.into_inner().unwrap();
                let store = store_mutex.into_inner().unwrap();
                let runtime = runtime_mutex.into_inner().unwrap();

                let controller = rocket_client
                    .rocket()
                    .state::<crate::election::ElectionController>()
                    .unwrap()
                    .clone();
                let ledger = controller.ledger().clone();

                runtime.block_on(#new_name(#(#test_args),*));
            });

            // Run the cleanup.
            cleanup(&dir);

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::panic_any(cause);
            }
        }
    }
    .into()
}

/// Ensure the wrapped test is async, map each parameter to the dependency it
/// asks for, and reject unknown or repeated parameters.
fn check_sig(sig: Signature) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut seen: Vec<String> = vec![];
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                // Valid as the last path segment for any type is itself.
                let type_ident = &type_path.path.segments.last().unwrap().ident;
                let type_name = type_ident.to_string();
                if INJECTABLE.contains(&type_name.as_str()) {
                    if seen.contains(&type_name) {
                        return Err(syn::Error::new(
                            input.span(),
                            format!("Test cannot accept more than one `{type_name}`"),
                        ));
                    }
                    args.push(match type_name.as_str() {
                        "Client" => quote! { rocket_client },
                        "Ledger" => quote! { ledger },
                        "MemoryStore" => quote! { store },
                        _ => quote! { controller },
                    });
                    seen.push(type_name);
                    continue;
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `Client`, `Ledger`, `MemoryStore` or `ElectionController`",
        ));
    }

    Ok(args)
}
