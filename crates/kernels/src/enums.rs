//! OpenVX kernel and enumeration constants.

pub const VX_KERNEL_COLOR_CONVERT: u32 = 0x01;
pub const VX_KERNEL_CHANNEL_EXTRACT: u32 = 0x02;
pub const VX_KERNEL_CHANNEL_COMBINE: u32 = 0x03;
pub const VX_KERNEL_SOBEL_3X3: u32 = 0x04;
pub const VX_KERNEL_MAGNITUDE: u32 = 0x05;
pub const VX_KERNEL_PHASE: u32 = 0x06;
pub const VX_KERNEL_TABLE_LOOKUP: u32 = 0x08;
pub const VX_KERNEL_HISTOGRAM: u32 = 0x09;
pub const VX_KERNEL_ABSDIFF: u32 = 0x0B;
pub const VX_KERNEL_THRESHOLD: u32 = 0x0D;
pub const VX_KERNEL_DILATE_3X3: u32 = 0x0F;
pub const VX_KERNEL_ERODE_3X3: u32 = 0x10;
pub const VX_KERNEL_MEDIAN_3X3: u32 = 0x11;
pub const VX_KERNEL_BOX_3X3: u32 = 0x12;
pub const VX_KERNEL_GAUSSIAN_3X3: u32 = 0x13;
pub const VX_KERNEL_GAUSSIAN_PYRAMID: u32 = 0x15;
pub const VX_KERNEL_ACCUMULATE: u32 = 0x16;
pub const VX_KERNEL_MINMAXLOC: u32 = 0x19;
pub const VX_KERNEL_CONVERTDEPTH: u32 = 0x1A;
pub const VX_KERNEL_AND: u32 = 0x1C;
pub const VX_KERNEL_OR: u32 = 0x1D;
pub const VX_KERNEL_XOR: u32 = 0x1E;
pub const VX_KERNEL_NOT: u32 = 0x1F;
pub const VX_KERNEL_MULTIPLY: u32 = 0x20;
pub const VX_KERNEL_ADD: u32 = 0x21;
pub const VX_KERNEL_SUBTRACT: u32 = 0x22;

/// Vendor range for kernels outside the Khronos set.
pub const VXF_KERNEL_BASE: u32 = 0xFFE << 20;
pub const VXF_KERNEL_MULTIPLY_SCALAR: u32 = VXF_KERNEL_BASE + 0x1;
pub const VXF_KERNEL_CLAMP: u32 = VXF_KERNEL_BASE + 0x2;

pub const VX_CONVERT_POLICY_WRAP: u32 = 0xA000;
pub const VX_CONVERT_POLICY_SATURATE: u32 = 0xA001;

pub const VX_CHANNEL_0: u32 = 0x9000;
pub const VX_CHANNEL_1: u32 = 0x9001;
pub const VX_CHANNEL_2: u32 = 0x9002;
pub const VX_CHANNEL_3: u32 = 0x9003;
pub const VX_CHANNEL_R: u32 = 0x9010;
pub const VX_CHANNEL_G: u32 = 0x9011;
pub const VX_CHANNEL_B: u32 = 0x9012;
pub const VX_CHANNEL_A: u32 = 0x9013;

/// Interleaved channel index selected by a channel enum.
pub fn channel_index(channel: u32) -> Option<usize> {
    match channel {
        VX_CHANNEL_0 | VX_CHANNEL_R => Some(0),
        VX_CHANNEL_1 | VX_CHANNEL_G => Some(1),
        VX_CHANNEL_2 | VX_CHANNEL_B => Some(2),
        VX_CHANNEL_3 | VX_CHANNEL_A => Some(3),
        _ => None,
    }
}
