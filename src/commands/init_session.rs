//! Interactive Telegram session authorization.
//!
//! Creates or refreshes the session file. Asks for the login code sent by
//! Telegram and, when the account has two-factor auth, for the password.

use std::io::{self, BufRead, Write};

use grammers_client::SignInError;
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::session::{get_client_for_init, SessionLock};

pub async fn run() -> Result<()> {
    let config = Config::new();
    if config.api_id == 0 || config.api_hash.is_empty() {
        return Err(Error::InvalidArgument(
            "api_id/api_hash are not configured; set them in config.yml or via \
             TELEGRAM_API_ID / TELEGRAM_API_HASH"
                .to_string(),
        ));
    }

    let _lock = SessionLock::acquire()?;
    let client = get_client_for_init().await?;

    if client
        .is_authorized()
        .await
        .map_err(|e| Error::TelegramError(e.to_string()))?
    {
        println!("✅ Session is already authorized.");
        client.save()?;
        return Ok(());
    }

    let phone = if config.phone.is_empty() {
        prompt("Phone number (international format): ")?
    } else {
        config.phone.clone()
    };

    println!("Sending login code to {}...", phone);
    let token = client
        .request_login_code(&phone, &config.api_hash)
        .await
        .map_err(|e| Error::TelegramError(e.to_string()))?;

    let code = prompt("Enter the code you received: ")?;

    match client.sign_in(&token, &code).await {
        Ok(user) => {
            info!(user = %user.full_name(), "signed in");
            println!("✅ Signed in as {}", user.full_name());
        }
        Err(SignInError::PasswordRequired(password_token)) => {
            let hint = password_token.hint().unwrap_or("none");
            let password = prompt(&format!("Two-factor password (hint: {}): ", hint))?;
            client
                .check_password(password_token, password)
                .await
                .map_err(|e| Error::TelegramError(e.to_string()))?;
            println!("✅ Signed in with two-factor authentication.");
        }
        Err(err) => return Err(Error::TelegramError(err.to_string())),
    }

    client.save()?;
    println!("Session saved.");
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
