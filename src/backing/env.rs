//! Read-only [`Backing`] over the process environment.
//!
//! Key `sf.metrics.auth_token` with prefix `APP_` reads the variable
//! `APP_SF_METRICS_AUTH_TOKEN`.

use async_trait::async_trait;

use super::Backing;
use crate::error::{DistconfError, Result};

#[derive(Debug, Clone, Default)]
pub struct EnvBacking {
    prefix: String,
}

impl EnvBacking {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn var_name(&self, key: &str) -> String {
        let mut name = self.prefix.clone();
        name.extend(key.chars().map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        }));
        name
    }
}

#[async_trait]
impl Backing for EnvBacking {
    fn name(&self) -> &'static str {
        "env"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(std::env::var(self.var_name(key)).ok().map(String::into_bytes))
    }

    async fn write(&self, _key: &str, _value: Option<&[u8]>) -> Result<()> {
        Err(DistconfError::ReadOnly { backing: "env" })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_name_mapping() {
        let env = EnvBacking::new("APP_");
        assert_eq!(env.var_name("sf.metrics.auth_token"), "APP_SF_METRICS_AUTH_TOKEN");
        assert_eq!(env.var_name("a-b"), "APP_A_B");
    }

    #[tokio::test]
    async fn reads_variable_and_rejects_writes() {
        let env = EnvBacking::new("DISTCONF_ENV_TEST_");
        std::env::set_var("DISTCONF_ENV_TEST_SOME_KEY", "value");
        assert_eq!(env.get("some.key").await.unwrap(), Some(b"value".to_vec()));
        assert_eq!(env.get("other.key").await.unwrap(), None);
        assert!(matches!(
            env.write("some.key", None).await,
            Err(DistconfError::ReadOnly { .. })
        ));
    }
}
