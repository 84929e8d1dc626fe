/// Возможности CPU, важные для multi-buffer криптографии
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuFeatures {
    pub avx512f: bool,
    pub avx512ifma: bool,
    pub vaes: bool,
    pub bmi2: bool,
}

impl Default for CpuFeatures {
    fn default() -> Self {
        Self::detect()
    }
}

impl CpuFeatures {
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            use std::arch::is_x86_feature_detected;
            Self {
                avx512f: is_x86_feature_detected!("avx512f"),
                avx512ifma: is_x86_feature_detected!("avx512ifma"),
                vaes: is_x86_feature_detected!("vaes"),
                bmi2: is_x86_feature_detected!("bmi2"),
            }
        }

        #[cfg(not(target_arch = "x86_64"))]
        {
            Self::none()
        }
    }

    pub const fn none() -> Self {
        Self {
            avx512f: false,
            avx512ifma: false,
            vaes: false,
            bmi2: false,
        }
    }

    /// Набор инструкций, которого требует 8-канальная AVX-512 реализация
    pub fn supports_avx512_mb8(&self) -> bool {
        self.avx512f && self.avx512ifma && self.bmi2
    }
}
