//! Sign in with Apple from the command line.
//!
//! Reads `APPLE_TEAM_ID`, `APPLE_KEY_ID`, `APPLE_KEY_FILE_PATH`,
//! `APPLE_CLIENT_ID` and `APPLE_REDIRECT_URI`, prints the authorization URL,
//! then exchanges the code passed as the first argument.

use ras_identity_apple::{AppleConfig, AppleError, AppleProvider, AuthorizationOptions, Grant};
use std::collections::HashMap;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = AppleConfig::from_env().with_jwks_cache_ttl(3600);
    let provider = AppleProvider::new(config)?;

    let request = provider.authorization_url(AuthorizationOptions::default())?;
    println!("Open this URL to sign in:\n{}", request.url);
    println!("State: {}", request.state);

    let Some(code) = std::env::args().nth(1) else {
        println!("\nRun again with the returned code as the first argument.");
        return Ok(());
    };
    // Apple posts the profile only on the first sign in
    let user = std::env::args().nth(2).unwrap_or_default();

    match provider.get_access_token(Grant::authorization_code(code)).await {
        Ok(token) => {
            let form = HashMap::from([("user".to_string(), user)]);
            let owner = provider.get_resource_owner(&token, &HashMap::new(), &form);

            println!("Signed in as {:?}", owner.id());
            println!("Email: {:?} (private relay: {})", owner.email(), owner.is_private_email());
            if let Some(first_name) = owner.first_name() {
                println!("Name: {} {}", first_name, owner.last_name().unwrap_or_default());
            }
        }
        Err(AppleError::AccessDenied { reason, code, .. }) => {
            eprintln!("Apple refused the code: {} ({})", reason, code);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
