use std::sync::Arc;

/// Ширина multi-buffer батча: столько независимых операций за один вызов
pub const MULTIBUFF_BATCH: usize = 8;

/// Побитовый статус вызова: бит `i` установлен, если слот `i` обработан успешно
pub type SlotMask = u8;

#[inline]
pub fn slot_succeeded(mask: SlotMask, slot: usize) -> bool {
    slot < MULTIBUFF_BATCH && mask & (1u8 << slot) != 0
}

/// 8-канальный примитив ECDH.
///
/// Каждый метод принимает от 1 до `MULTIBUFF_BATCH` слотов (длины всех срезов
/// совпадают) и возвращает маску успешных слотов. Ошибка в одном слоте не
/// влияет на результаты соседних.
///
/// Приватные ключи и координаты P-256 передаются как big-endian 32 байта.
/// Публичные координаты P-256 возвращаются как big-integer: big-endian без
/// ведущих нулей.
pub trait MultiBufferCrypto: Send + Sync {
    fn name(&self) -> &'static str;

    /// Доступен ли примитив на текущем CPU
    fn is_applicable(&self) -> bool;

    fn x25519_public_key_mb8(
        &self,
        public_keys: &mut [[u8; 32]],
        private_keys: &[[u8; 32]],
    ) -> SlotMask;

    fn x25519_mb8(
        &self,
        shared_keys: &mut [[u8; 32]],
        private_keys: &[[u8; 32]],
        peer_keys: &[[u8; 32]],
    ) -> SlotMask;

    fn p256_public_key_mb8(
        &self,
        public_x: &mut [Vec<u8>],
        public_y: &mut [Vec<u8>],
        private_keys: &[[u8; 32]],
    ) -> SlotMask;

    fn p256_ecdh_mb8(
        &self,
        shared_keys: &mut [[u8; 32]],
        private_keys: &[[u8; 32]],
        peer_x: &[[u8; 32]],
        peer_y: &[[u8; 32]],
    ) -> SlotMask;
}

pub type MultiBufferCryptoRef = Arc<dyn MultiBufferCrypto>;
