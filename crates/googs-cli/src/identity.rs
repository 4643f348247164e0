use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use googs_core::IdentityProvider;

/// Identity token used by `login` when none is given on the command line
const ENV_ID_TOKEN: &str = "GOOGS_ID_TOKEN";

/// Takes the identity token from `GOOGS_ID_TOKEN`, or asks for it on the
/// terminal without echoing it.
pub struct PromptIdentityProvider;

impl IdentityProvider for PromptIdentityProvider {
    fn identity_token(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            if let Some(token) = std::env::var(ENV_ID_TOKEN).ok().and_then(normalize) {
                return Ok(token);
            }

            let entered = tokio::task::spawn_blocking(|| rpassword::prompt_password("Identity token: "))
                .await
                .context("Identity prompt task failed")?
                .context("Failed to read identity token")?;
            match normalize(entered) {
                Some(token) => Ok(token),
                None => bail!("No identity token entered"),
            }
        })
    }
}

fn normalize(token: String) -> Option<String> {
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  abc.def \n".to_string()).as_deref(), Some("abc.def"));
        assert_eq!(normalize("   ".to_string()), None);
    }
}
