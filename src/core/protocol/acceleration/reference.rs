use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{ecdh, EncodedPoint, PublicKey as P256PublicKey, SecretKey};
use rand_core::OsRng;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::core::protocol::shared_key::types::Algorithm;

/// Скалярная сторона обмена ключами (обычный, не батчевый ECDH).
///
/// Играет роль удалённого пира: отдаёт свой публичный ключ и проверяет,
/// что секрет, вычисленный провайдером, совпадает с её собственным.
pub enum ReferencePeer {
    X25519(StaticSecret),
    P256(SecretKey),
}

impl ReferencePeer {
    pub fn generate(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::X25519 => ReferencePeer::X25519(StaticSecret::random_from_rng(OsRng)),
            Algorithm::P256 => ReferencePeer::P256(SecretKey::random(&mut OsRng)),
        }
    }

    /// Публичный ключ в формате провода: 32 байта или несжатая точка SEC1
    pub fn public_key(&self) -> Vec<u8> {
        match self {
            ReferencePeer::X25519(secret) => X25519PublicKey::from(secret).as_bytes().to_vec(),
            ReferencePeer::P256(secret) => secret
                .public_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
        }
    }

    /// Общий секрет с ключом, который прислала другая сторона.
    /// `None`, если ключ некорректен.
    pub fn agree(&self, their_public: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        match self {
            ReferencePeer::X25519(secret) => {
                let bytes: [u8; 32] = their_public.try_into().ok()?;
                let shared = secret.diffie_hellman(&X25519PublicKey::from(bytes));
                if !shared.was_contributory() {
                    return None;
                }
                Some(Zeroizing::new(shared.as_bytes().to_vec()))
            }
            ReferencePeer::P256(secret) => {
                let encoded = EncodedPoint::from_bytes(their_public).ok()?;
                let public: Option<P256PublicKey> = P256PublicKey::from_encoded_point(&encoded).into();
                let public = public?;
                let shared = ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
                Some(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
        }
    }
}
