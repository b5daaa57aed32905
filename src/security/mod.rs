pub mod request_signer;
pub mod token_cache;
