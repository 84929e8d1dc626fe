use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{ecdh, EncodedPoint, FieldBytes, PublicKey as P256PublicKey, SecretKey};
use tracing::info;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use super::features::CpuFeatures;
use super::multi_buffer::{MultiBufferCrypto, SlotMask, MULTIBUFF_BATCH};

/// Переносимая реализация 8-канального ECDH.
///
/// Слоты обрабатываются по очереди скалярным кодом `x25519-dalek` / `p256`,
/// контракт (маска статусов, изоляция слотов) тот же, что у AVX-512 backend-а.
/// С `require_avx512` backend применим только на CPU с набором инструкций
/// 8-канальной реализации.
pub struct PortableMultiBuffer {
    features: CpuFeatures,
    require_avx512: bool,
}

impl PortableMultiBuffer {
    pub fn new() -> Self {
        Self::with_features(CpuFeatures::detect(), false)
    }

    pub fn with_features(features: CpuFeatures, require_avx512: bool) -> Self {
        info!("🚀 PortableMultiBuffer initialized:");
        info!("  - Batch width: {}", MULTIBUFF_BATCH);
        info!("  - AVX512F: {}", features.avx512f);
        info!("  - AVX512IFMA: {}", features.avx512ifma);
        info!("  - VAES: {}", features.vaes);
        info!("  - AVX-512 required: {}", require_avx512);

        Self { features, require_avx512 }
    }
}

impl Default for PortableMultiBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiBufferCrypto for PortableMultiBuffer {
    fn name(&self) -> &'static str {
        "portable"
    }

    fn is_applicable(&self) -> bool {
        !self.require_avx512 || self.features.supports_avx512_mb8()
    }

    fn x25519_public_key_mb8(
        &self,
        public_keys: &mut [[u8; 32]],
        private_keys: &[[u8; 32]],
    ) -> SlotMask {
        debug_assert_eq!(public_keys.len(), private_keys.len());

        let mut status: SlotMask = 0;
        for (slot, (public, private)) in public_keys
            .iter_mut()
            .zip(private_keys)
            .enumerate()
            .take(MULTIBUFF_BATCH)
        {
            let secret = StaticSecret::from(*private);
            *public = X25519PublicKey::from(&secret).to_bytes();
            status |= 1u8 << slot;
        }
        status
    }

    fn x25519_mb8(
        &self,
        shared_keys: &mut [[u8; 32]],
        private_keys: &[[u8; 32]],
        peer_keys: &[[u8; 32]],
    ) -> SlotMask {
        debug_assert_eq!(shared_keys.len(), private_keys.len());
        debug_assert_eq!(shared_keys.len(), peer_keys.len());

        let mut status: SlotMask = 0;
        for (slot, (shared, (private, peer))) in shared_keys
            .iter_mut()
            .zip(private_keys.iter().zip(peer_keys))
            .enumerate()
            .take(MULTIBUFF_BATCH)
        {
            let secret = StaticSecret::from(*private);
            let result = secret.diffie_hellman(&X25519PublicKey::from(*peer));

            // Точка малого порядка даёт нулевой секрет
            if result.was_contributory() {
                shared.copy_from_slice(result.as_bytes());
                status |= 1u8 << slot;
            } else {
                *shared = [0u8; 32];
            }
        }
        status
    }

    fn p256_public_key_mb8(
        &self,
        public_x: &mut [Vec<u8>],
        public_y: &mut [Vec<u8>],
        private_keys: &[[u8; 32]],
    ) -> SlotMask {
        debug_assert_eq!(public_x.len(), private_keys.len());
        debug_assert_eq!(public_y.len(), private_keys.len());

        let mut status: SlotMask = 0;
        for (slot, ((x_out, y_out), private)) in public_x
            .iter_mut()
            .zip(public_y.iter_mut())
            .zip(private_keys)
            .enumerate()
            .take(MULTIBUFF_BATCH)
        {
            let secret = match SecretKey::from_bytes(FieldBytes::from_slice(private)) {
                Ok(secret) => secret,
                Err(_) => continue,
            };

            let point = secret.public_key().to_encoded_point(false);
            if let (Some(x), Some(y)) = (point.x(), point.y()) {
                *x_out = to_bignum_bytes(x);
                *y_out = to_bignum_bytes(y);
                status |= 1u8 << slot;
            }
        }
        status
    }

    fn p256_ecdh_mb8(
        &self,
        shared_keys: &mut [[u8; 32]],
        private_keys: &[[u8; 32]],
        peer_x: &[[u8; 32]],
        peer_y: &[[u8; 32]],
    ) -> SlotMask {
        debug_assert_eq!(shared_keys.len(), private_keys.len());
        debug_assert_eq!(shared_keys.len(), peer_x.len());
        debug_assert_eq!(shared_keys.len(), peer_y.len());

        let mut status: SlotMask = 0;
        for (slot, (shared, (private, (x, y)))) in shared_keys
            .iter_mut()
            .zip(private_keys.iter().zip(peer_x.iter().zip(peer_y)))
            .enumerate()
            .take(MULTIBUFF_BATCH)
        {
            *shared = [0u8; 32];

            let secret = match SecretKey::from_bytes(FieldBytes::from_slice(private)) {
                Ok(secret) => secret,
                Err(_) => continue,
            };

            let encoded = EncodedPoint::from_affine_coordinates(
                FieldBytes::from_slice(x),
                FieldBytes::from_slice(y),
                false,
            );
            let peer: Option<P256PublicKey> = P256PublicKey::from_encoded_point(&encoded).into();
            let peer = match peer {
                Some(peer) => peer,
                None => continue,
            };

            let result = ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
            shared.copy_from_slice(result.raw_secret_bytes());
            status |= 1u8 << slot;
        }
        status
    }
}

/// Big-endian без ведущих нулей
fn to_bignum_bytes(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}
