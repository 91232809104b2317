//! The relay's own long-lived key pair
//!
//! Generated once at startup and shared read-only by every connection. The
//! secret key is never serialized and is wiped on drop.

use std::sync::Arc;

use tracing::{debug, info};

use crate::crypto::{
    CryptoError, Hash, KemKeyPair, KemProvider, KemPublicKey, KemSecretKey, SignatureProvider,
};
use crate::error::{RelayError, RelayResult};

const SELF_TEST_MESSAGE: &[u8] = b"tetra-relay self-test";

/// Server key material
pub struct ServerIdentity {
    keypair: KemKeyPair,
    server_id: String,
    signer: Option<Arc<dyn SignatureProvider>>,
}

impl ServerIdentity {
    /// Generate a fresh key pair through `provider`
    ///
    /// Failure is fatal: a relay without an identity must not start.
    pub fn initialize(provider: &dyn KemProvider) -> RelayResult<Self> {
        let keypair = provider
            .generate_keypair()
            .map_err(RelayError::KeyGeneration)?;
        let server_id = format!("relay-{}", Hash::fingerprint(keypair.public.as_bytes()));

        info!(
            server_id = %server_id,
            algorithm = provider.algorithm(),
            "Server identity generated"
        );

        Ok(ServerIdentity {
            keypair,
            server_id,
            signer: None,
        })
    }

    /// Attach a signing identity used to sign the key exchange reply
    pub fn with_signer(mut self, signer: Arc<dyn SignatureProvider>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Public key handed to peers
    pub fn public_key(&self) -> &KemPublicKey {
        &self.keypair.public
    }

    /// Secret key, only for decapsulation
    pub(crate) fn secret_key(&self) -> &KemSecretKey {
        &self.keypair.secret
    }

    /// Identifier sent in the key exchange reply
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Round-trip the provider and signer once with the generated keys
    ///
    /// Run before serving. Any failure is a fatal
    /// [`RelayError::KeyGeneration`]: a relay whose keys do not work must
    /// not accept peers.
    pub fn self_test(&self, provider: &dyn KemProvider) -> RelayResult<()> {
        let sealed = provider
            .encapsulate(&self.keypair.public, SELF_TEST_MESSAGE)
            .map_err(RelayError::KeyGeneration)?;
        let opened = provider
            .decapsulate(&self.keypair.secret, &sealed)
            .map_err(RelayError::KeyGeneration)?;
        if opened != SELF_TEST_MESSAGE {
            return Err(RelayError::KeyGeneration(CryptoError::DecapsulationFailed));
        }

        if let Some(signer) = &self.signer {
            let signature = signer.sign(SELF_TEST_MESSAGE);
            signer
                .verify(&signer.verifying_key(), SELF_TEST_MESSAGE, &signature)
                .map_err(RelayError::KeyGeneration)?;
        }

        debug!(server_id = %self.server_id, "Provider self-test passed");
        Ok(())
    }

    /// `(signature over the public key, verifying key)` if a signer is attached
    pub fn signed_public_key(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        self.signer.as_ref().map(|signer| {
            (
                signer.sign(self.keypair.public.as_bytes()),
                signer.verifying_key(),
            )
        })
    }
}

impl std::fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("server_id", &self.server_id)
            .field("public_key", &self.keypair.public)
            .field("signed", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}
