//! Kernel registry for lookup by name or enumeration value.

use crate::color::{ChannelCombineKernel, ChannelExtractKernel, ColorConvertKernel};
use crate::elementwise::*;
use crate::filters::{Filter3x3Kernel, FilterOp, SobelKernel};
use crate::pyramid::GaussianPyramidKernel;
use crate::statistics::{AccumulateKernel, HistogramKernel, MinMaxLocKernel, TableLookupKernel};
use crate::template::{DynKernel, Kernel};
use std::sync::{Arc, OnceLock};
use tracing::debug;

#[derive(Clone, Default)]
pub struct KernelRegistry {
    kernels: Vec<DynKernel>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self {
            kernels: Vec::new(),
        }
    }

    /// Every built-in kernel.
    pub fn with_standard_kernels() -> Self {
        let mut registry = Self::new();
        registry.register(ColorConvertKernel::new());
        registry.register(ChannelExtractKernel::new());
        registry.register(ChannelCombineKernel::new());
        registry.register(ArithmeticKernel::new(ArithmeticOp::Add));
        registry.register(ArithmeticKernel::new(ArithmeticOp::Subtract));
        registry.register(MultiplyKernel::new());
        registry.register(AbsDiffKernel::new());
        registry.register(BitwiseKernel::new(BitwiseOp::And));
        registry.register(BitwiseKernel::new(BitwiseOp::Or));
        registry.register(BitwiseKernel::new(BitwiseOp::Xor));
        registry.register(NotKernel::new());
        registry.register(ThresholdKernel::new());
        registry.register(MagnitudeKernel::new());
        registry.register(PhaseKernel::new());
        registry.register(ConvertDepthKernel::new());
        registry.register(MultiplyScalarKernel::new());
        registry.register(ClampKernel::new());
        for op in [
            FilterOp::Gaussian,
            FilterOp::Box,
            FilterOp::Median,
            FilterOp::Dilate,
            FilterOp::Erode,
        ] {
            registry.register(Filter3x3Kernel::new(op));
        }
        registry.register(SobelKernel::new());
        registry.register(TableLookupKernel::new());
        registry.register(HistogramKernel::new());
        registry.register(MinMaxLocKernel::new());
        registry.register(AccumulateKernel::new());
        registry.register(GaussianPyramidKernel::new());
        registry
    }

    /// Process-wide registry of the built-in kernels, shared by graphs that do not bring their own.
    pub fn global() -> Arc<KernelRegistry> {
        static GLOBAL: OnceLock<Arc<KernelRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(KernelRegistry::with_standard_kernels())))
    }

    /// Adds `kernel`, replacing any kernel registered under the same name.
    pub fn register<K>(&mut self, kernel: K)
    where
        K: Kernel + 'static,
    {
        let kernel: DynKernel = Arc::new(kernel);
        match self
            .kernels
            .iter()
            .position(|existing| existing.name() == kernel.name())
        {
            Some(index) => {
                debug!(kernel = kernel.name(), "replacing registered kernel");
                self.kernels[index] = kernel;
            }
            None => self.kernels.push(kernel),
        }
    }

    pub fn kernels(&self) -> &[DynKernel] {
        &self.kernels
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<DynKernel> {
        self.kernels
            .iter()
            .find(|kernel| kernel.name() == name)
            .map(Arc::clone)
    }

    pub fn find_by_enum(&self, enum_id: u32) -> Option<DynKernel> {
        self.kernels
            .iter()
            .find(|kernel| kernel.enum_id() == enum_id)
            .map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::{VX_KERNEL_SOBEL_3X3, VXF_KERNEL_CLAMP};
    use crate::signature::KernelSignature;
    use crate::template::{Inference, Rejection};
    use vxforge_ir::ObjectMeta;

    struct Shadow {
        signature: KernelSignature,
    }

    impl Kernel for Shadow {
        fn signature(&self) -> &KernelSignature {
            &self.signature
        }

        fn validate(&self, _params: &[Option<ObjectMeta>]) -> Result<Vec<Inference>, Rejection> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn standard_kernels_resolve_by_name_and_enum() {
        let registry = KernelRegistry::with_standard_kernels();
        let names: Vec<&str> = registry.kernels().iter().map(|kernel| kernel.name()).collect();
        let mut unique = names.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), names.len());
        assert!(registry.find("vx.add").is_some_and(|kernel| kernel.is_elementwise()));
        assert!(registry.find("vx.gaussian_3x3").is_some_and(|kernel| !kernel.is_elementwise()));
        assert_eq!(
            registry.find_by_enum(VX_KERNEL_SOBEL_3X3).map(|kernel| kernel.name().to_string()),
            Some("vx.sobel_3x3".to_string())
        );
        assert!(registry.find_by_enum(VXF_KERNEL_CLAMP).is_some());
        assert!(registry.find("vx.warp_affine").is_none());
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = KernelRegistry::with_standard_kernels();
        let before = registry.len();
        registry.register(Shadow {
            signature: KernelSignature::new("vx.not", 0x7777),
        });
        assert_eq!(registry.len(), before);
        assert_eq!(registry.find("vx.not").map(|kernel| kernel.enum_id()), Some(0x7777));
    }
}
