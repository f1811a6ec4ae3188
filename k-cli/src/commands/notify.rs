//! `k notify <message> --app <name>` — telegram notifications, used by the
//! rendered `k-notify@.service` on unit failure.

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::load;

#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// Message text.
    pub message: Option<String>,

    /// App the notification concerns; appended to the message.
    #[arg(long, default_value = "")]
    pub app: String,
}

impl NotifyArgs {
    pub fn run(self) -> Result<()> {
        let (config, _) = load::load_config()?;
        let telegram = config
            .vars
            .get("telegram")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let parts: Vec<&str> = telegram.split(':').collect();
        let [bot_id, token, chat_id] = parts.as_slice() else {
            bail!(".Vars.telegram must be in the format <bot_id>:<token>:<chat_id>");
        };
        let mut message = self.message.unwrap_or_default();
        if !self.app.is_empty() {
            message = format!("{message}\n{}", self.app).trim().to_string();
        }
        send_telegram(bot_id, token, chat_id, &message)
    }
}

fn send_telegram(bot_id: &str, token: &str, chat_id: &str, text: &str) -> Result<()> {
    let url = format!("https://api.telegram.org/{bot_id}:{token}/sendMessage");
    let response = reqwest::blocking::Client::new()
        .post(url)
        .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
        .send()
        .context("telegram request")?;
    let body: serde_json::Value = response.json().context("telegram response")?;
    if !body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
        bail!("error sending message: {body}");
    }
    Ok(())
}
