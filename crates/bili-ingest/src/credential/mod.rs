//! Session credentials and the rotating credential pool.

mod cookie;
mod pool;

pub use cookie::{
    BILI_JCT, BUVID3, Credential, DEDE_USER_ID, REFRESH_TOKEN_KEY, SESSDATA, generate_fake_buvid3,
};
pub use pool::{CredentialEntry, CredentialPool, CredentialStatus, PoolConfig, PooledCredential};
