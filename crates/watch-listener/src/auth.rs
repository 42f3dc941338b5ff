//! Interactive sign-in for the user account the listener runs as.

use std::path::{Path, PathBuf};

use grammers_client::{Client, Config as ClientConfig, InitParams, SignInError};
use grammers_session::Session;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::info;
use watch_core::{config::Config, errors::Error, Result};

/// Everything needed to connect as a Telegram user.
#[derive(Clone, Debug)]
pub struct ListenerOptions {
    pub api_id: i32,
    pub api_hash: String,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub session_file: PathBuf,
    pub backfill_limit: usize,
}

impl ListenerOptions {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let (api_id, api_hash) = cfg.listener_credentials()?;
        Ok(Self {
            api_id,
            api_hash: api_hash.to_string(),
            phone: cfg.telegram_phone.clone(),
            password: cfg.telegram_password.clone(),
            session_file: cfg.session_file(),
            backfill_limit: cfg.backfill_limit,
        })
    }
}

pub(crate) fn tg_err(context: &str) -> impl Fn(grammers_client::InvocationError) -> Error + '_ {
    move |e| Error::Telegram(format!("{context}: {e}"))
}

/// Load the session at `path`, creating it when missing. The flag is true for a new file.
pub fn open_session(path: &Path) -> Result<(Session, bool)> {
    let fresh = !path.exists();
    let session = Session::load_file_or_create(path)?;
    if fresh {
        info!(path = %path.display(), "creating new session file");
    } else {
        info!(path = %path.display(), "reusing session file");
    }
    Ok((session, fresh))
}

/// Connect, reusing the session file when it exists.
pub async fn connect(opts: &ListenerOptions) -> Result<Client> {
    let (session, _) = open_session(&opts.session_file)?;

    Client::connect(ClientConfig {
        session,
        api_id: opts.api_id,
        api_hash: opts.api_hash.clone(),
        params: InitParams {
            catch_up: false,
            ..Default::default()
        },
    })
    .await
    .map_err(|e| Error::Telegram(format!("connect failed: {e}")))
}

/// Sign in if the session is not authorised yet. Reads missing values from stdin.
pub async fn ensure_authorized(client: &Client, opts: &ListenerOptions) -> Result<()> {
    if client
        .is_authorized()
        .await
        .map_err(tg_err("authorization check failed"))?
    {
        return Ok(());
    }

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();

    let phone = match &opts.phone {
        Some(p) => p.clone(),
        None => {
            prompt_line(
                &mut stdin,
                &mut stdout,
                "Please enter your phone number (international format): ",
            )
            .await?
        }
    };
    let token = client
        .request_login_code(&phone)
        .await
        .map_err(|e| Error::Telegram(format!("login code request failed: {e}")))?;
    let code = prompt_line(&mut stdin, &mut stdout, "Please enter the code you received: ").await?;

    match client.sign_in(&token, &code).await {
        Ok(_) => {}
        Err(SignInError::PasswordRequired(password_token)) => {
            let password = match &opts.password {
                Some(p) => p.clone(),
                None => {
                    let label = format!(
                        "Two-step verification is enabled (hint: {}). Password: ",
                        password_token.hint().unwrap_or("none")
                    );
                    prompt_line(&mut stdin, &mut stdout, &label).await?
                }
            };
            client
                .check_password(password_token, password.trim())
                .await
                .map_err(|e| Error::Telegram(format!("password check failed: {e}")))?;
        }
        Err(e) => return Err(Error::Telegram(format!("sign in failed: {e}"))),
    }

    save_session(client.session(), &opts.session_file)?;
    info!("signed in to Telegram");
    Ok(())
}

pub fn save_session(session: &Session, path: &Path) -> Result<()> {
    session.save_to_file(path)?;
    Ok(())
}

async fn prompt_line<R, W>(input: &mut R, out: &mut W, label: &str) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    out.write_all(label.as_bytes()).await?;
    out.flush().await?;
    let mut line = String::new();
    if input.read_line(&mut line).await? == 0 {
        return Err(Error::Config(format!(
            "no input for prompt: {}",
            label.trim_end()
        )));
    }
    let value = line.trim();
    if value.is_empty() {
        return Err(Error::Config(format!("empty answer for: {}", label.trim_end())));
    }
    Ok(value.to_string())
}
