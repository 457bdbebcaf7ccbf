use std::convert::TryInto;
use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::error::ConfigurationError;

const PASSWORD_SALT: &str = "password.salt";
const USER_AUTH_PUBLIC: &str = "user_auth.pem.pub";
const USER_AUTH_PRIVATE: &str = "user_auth.pem";

#[cfg(feature = "generate-security")]
const RSA_KEY_BITS: usize = 4096;

pub type Salt = [u8; 16];

#[derive(Clone)]
pub struct KeySet {
    pub public: Vec<u8>,
    pub private: Vec<u8>,
}

impl std::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeySet(public: {} bytes, private: <hidden>)", self.public.len())
    }
}

#[derive(Debug, Clone)]
pub struct Security {
    pub salt: Salt,
    pub jwt_keys: KeySet,
    /// bcrypt cost used for password and access key hashes.
    pub password_cost: u32,
}

#[inline]
fn security_dir() -> PathBuf {
    PathBuf::from(env::var("SECURITY_DIR").unwrap_or("./security".to_string()))
}

impl Security {
    pub fn load(password_cost: u32) -> Result<Security, ConfigurationError> {
        Security::load_from(security_dir(), password_cost)
    }

    pub fn load_from(
        dir: impl AsRef<Path>,
        password_cost: u32,
    ) -> Result<Security, ConfigurationError> {
        let dir = dir.as_ref();

        if cfg!(feature = "generate-security") {
            fs::create_dir_all(dir)?;
        }

        tracing::info!("Loading password salt...");
        let salt: Option<Salt> = fs::read(dir.join(PASSWORD_SALT))
            .map(|s| s.try_into().ok())
            .ok()
            .flatten();

        let salt = match salt {
            Some(salt) => {
                tracing::info!("Salt found and loaded.");
                salt
            }
            None => {
                tracing::info!("Salt not found in '{}'.", dir.join(PASSWORD_SALT).display());
                if !cfg!(feature = "generate-security") {
                    return Err(ConfigurationError::MissingSecurity(dir.join(PASSWORD_SALT)));
                }
                tracing::info!("Generating a new password salt.");
                let salt: Salt = rand::random();
                fs::write(dir.join(PASSWORD_SALT), salt)?;
                salt
            }
        };

        tracing::info!("Loading JWT signing keys...");
        let pub_key = fs::read(dir.join(USER_AUTH_PUBLIC)).ok().filter(|k| !k.is_empty());
        let priv_key = fs::read(dir.join(USER_AUTH_PRIVATE)).ok().filter(|k| !k.is_empty());

        let jwt_keys = match (pub_key, priv_key) {
            (Some(public), Some(private)) => {
                tracing::info!("Loaded JWT keys.");
                KeySet { public, private }
            }
            #[cfg(feature = "generate-security")]
            _ => generate_key_set(dir)?,
            #[cfg(not(feature = "generate-security"))]
            _ => {
                return Err(ConfigurationError::MissingSecurity(
                    dir.join(USER_AUTH_PRIVATE),
                ));
            }
        };

        Ok(Security {
            salt,
            jwt_keys,
            password_cost,
        })
    }
}

#[cfg(feature = "generate-security")]
fn generate_key_set(dir: &Path) -> Result<KeySet, ConfigurationError> {
    use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
    use rsa::pkcs8::EncodePublicKey;

    tracing::info!("Unable to load private and/or public user auth key(s). Generating a new pair.");

    tracing::info!("Generating a private RSA key. This will take a few minutes...");
    let mut rng = rand::thread_rng();
    let rsa_sk = rsa::RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| ConfigurationError::SecurityGeneration(e.to_string()))?;

    tracing::info!("Creating PS256 private key...");
    let private = rsa_sk
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| ConfigurationError::SecurityGeneration(e.to_string()))?
        .to_string()
        .into_bytes();
    fs::write(dir.join(USER_AUTH_PRIVATE), private.as_slice())?;

    tracing::info!("Creating PS256 public key...");
    let public = rsa_sk
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| ConfigurationError::SecurityGeneration(e.to_string()))?
        .into_bytes();
    fs::write(dir.join(USER_AUTH_PUBLIC), public.as_slice())?;

    tracing::info!("Done generating JWT keys.");

    Ok(KeySet { public, private })
}

#[cfg(test)]
impl Security {
    /// Security material without JWT keys and with the cheapest bcrypt cost.
    pub fn for_tests() -> Security {
        Security {
            salt: [7; 16],
            jwt_keys: KeySet {
                public: vec![],
                private: vec![],
            },
            password_cost: 4,
        }
    }
}
