//! Data-object descriptions: kinds, formats and write-once metadata records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Graph-local identity of a data object, dense in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl ObjectId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    Image,
    Array,
    Scalar,
    Pyramid,
    Delay,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Image => "image",
            DataKind::Array => "array",
            DataKind::Scalar => "scalar",
            DataKind::Pyramid => "pyramid",
            DataKind::Delay => "delay",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    U8,
    U16,
    S16,
    U32,
    S32,
    F32,
    Rgb,
    Rgbx,
}

impl PixelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::U8 => "u8",
            PixelFormat::U16 => "u16",
            PixelFormat::S16 => "s16",
            PixelFormat::U32 => "u32",
            PixelFormat::S32 => "s32",
            PixelFormat::F32 => "f32",
            PixelFormat::Rgb => "rgb",
            PixelFormat::Rgbx => "rgbx",
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgbx => 4,
            _ => 1,
        }
    }

    /// Bytes per channel element.
    pub fn element_size(&self) -> usize {
        match self {
            PixelFormat::U8 | PixelFormat::Rgb | PixelFormat::Rgbx => 1,
            PixelFormat::U16 | PixelFormat::S16 => 2,
            PixelFormat::U32 | PixelFormat::S32 | PixelFormat::F32 => 4,
        }
    }

    pub fn pixel_size(&self) -> usize {
        self.channels() * self.element_size()
    }

    pub fn c_type(&self) -> &'static str {
        match self {
            PixelFormat::U8 | PixelFormat::Rgb | PixelFormat::Rgbx => "uint8_t",
            PixelFormat::U16 => "uint16_t",
            PixelFormat::S16 => "int16_t",
            PixelFormat::U32 => "uint32_t",
            PixelFormat::S32 => "int32_t",
            PixelFormat::F32 => "float",
        }
    }

    pub fn is_single_channel(&self) -> bool {
        self.channels() == 1
    }

    pub fn is_float(&self) -> bool {
        matches!(self, PixelFormat::F32)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    U8,
    U16,
    S16,
    U32,
    S32,
    F32,
    Bool,
    Enum,
}

impl ScalarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::U8 => "u8",
            ScalarType::U16 => "u16",
            ScalarType::S16 => "s16",
            ScalarType::U32 => "u32",
            ScalarType::S32 => "s32",
            ScalarType::F32 => "f32",
            ScalarType::Bool => "bool",
            ScalarType::Enum => "enum",
        }
    }

    pub fn c_type(&self) -> &'static str {
        match self {
            ScalarType::U8 => "uint8_t",
            ScalarType::U16 => "uint16_t",
            ScalarType::S16 => "int16_t",
            ScalarType::U32 | ScalarType::Enum => "uint32_t",
            ScalarType::S32 | ScalarType::Bool => "int32_t",
            ScalarType::F32 => "float",
        }
    }

    pub fn size(&self) -> usize {
        match self {
            ScalarType::U8 => 1,
            ScalarType::U16 | ScalarType::S16 => 2,
            _ => 4,
        }
    }

    /// Scalar type holding one pixel element of a single-channel format.
    pub fn for_format(format: PixelFormat) -> Option<Self> {
        match format {
            PixelFormat::U8 => Some(ScalarType::U8),
            PixelFormat::U16 => Some(ScalarType::U16),
            PixelFormat::S16 => Some(ScalarType::S16),
            PixelFormat::U32 => Some(ScalarType::U32),
            PixelFormat::S32 => Some(ScalarType::S32),
            PixelFormat::F32 => Some(ScalarType::F32),
            PixelFormat::Rgb | PixelFormat::Rgbx => None,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    U8(u8),
    U16(u16),
    S16(i16),
    U32(u32),
    S32(i32),
    F32(f32),
    Bool(bool),
    Enum(u32),
}

impl ScalarValue {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            ScalarValue::U8(_) => ScalarType::U8,
            ScalarValue::U16(_) => ScalarType::U16,
            ScalarValue::S16(_) => ScalarType::S16,
            ScalarValue::U32(_) => ScalarType::U32,
            ScalarValue::S32(_) => ScalarType::S32,
            ScalarValue::F32(_) => ScalarType::F32,
            ScalarValue::Bool(_) => ScalarType::Bool,
            ScalarValue::Enum(_) => ScalarType::Enum,
        }
    }

    /// C expression for a folded constant.
    pub fn c_literal(&self) -> String {
        match *self {
            ScalarValue::U8(v) => format!("((uint8_t){v})"),
            ScalarValue::U16(v) => format!("((uint16_t){v})"),
            ScalarValue::S16(v) => format!("((int16_t){v})"),
            ScalarValue::U32(v) | ScalarValue::Enum(v) => format!("{v}u"),
            ScalarValue::S32(v) => format!("((int32_t){v}L)"),
            ScalarValue::F32(v) if v.is_nan() => "NAN".to_string(),
            ScalarValue::F32(v) if v.is_infinite() => {
                if v > 0.0 {
                    "INFINITY".to_string()
                } else {
                    "(-INFINITY)".to_string()
                }
            }
            ScalarValue::F32(v) => format!("({v:?}f)"),
            ScalarValue::Bool(v) => u8::from(v).to_string(),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            ScalarValue::U8(v) => v as f64,
            ScalarValue::U16(v) => v as f64,
            ScalarValue::S16(v) => v as f64,
            ScalarValue::U32(v) | ScalarValue::Enum(v) => v as f64,
            ScalarValue::S32(v) => v as f64,
            ScalarValue::F32(v) => v as f64,
            ScalarValue::Bool(v) => v as u8 as f64,
        }
    }

    pub fn as_enum(&self) -> Option<u32> {
        match *self {
            ScalarValue::Enum(v) => Some(v),
            _ => None,
        }
    }
}

/// Element type of an array's items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    U8,
    U16,
    S16,
    U32,
    S32,
    F32,
    Coordinates2d,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::U8 => "u8",
            ItemType::U16 => "u16",
            ItemType::S16 => "s16",
            ItemType::U32 => "u32",
            ItemType::S32 => "s32",
            ItemType::F32 => "f32",
            ItemType::Coordinates2d => "coordinates2d",
        }
    }

    pub fn c_type(&self) -> &'static str {
        match self {
            ItemType::U8 => "uint8_t",
            ItemType::U16 => "uint16_t",
            ItemType::S16 => "int16_t",
            ItemType::U32 => "uint32_t",
            ItemType::S32 => "int32_t",
            ItemType::F32 => "float",
            ItemType::Coordinates2d => "vxf_coordinates2d_t",
        }
    }

    pub fn size(&self) -> usize {
        match self {
            ItemType::U8 => 1,
            ItemType::U16 | ItemType::S16 => 2,
            ItemType::U32 | ItemType::S32 | ItemType::F32 => 4,
            ItemType::Coordinates2d => 8,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<PixelFormat>,
}

impl ImageMeta {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            format: Some(format),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.width.is_some() && self.height.is_some() && self.format.is_some()
    }

    pub fn dims(&self) -> Option<(u32, u32)> {
        Some((self.width?, self.height?))
    }

    /// Pixel count, independent of channel count.
    pub fn element_count(&self) -> Option<usize> {
        let (width, height) = self.dims()?;
        Some(width as usize * height as usize)
    }

    pub fn byte_len(&self) -> Option<usize> {
        Some(self.element_count()? * self.format?.pixel_size())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayMeta {
    pub item_type: Option<ItemType>,
    pub capacity: Option<u32>,
}

impl ArrayMeta {
    pub fn new(item_type: ItemType, capacity: u32) -> Self {
        Self {
            item_type: Some(item_type),
            capacity: Some(capacity),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.item_type.is_some() && self.capacity.is_some()
    }
}

/// A scalar carrying `value` is a compile-time constant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalarMeta {
    pub scalar_type: Option<ScalarType>,
    pub value: Option<ScalarValue>,
}

impl ScalarMeta {
    pub fn of_type(scalar_type: ScalarType) -> Self {
        Self {
            scalar_type: Some(scalar_type),
            value: None,
        }
    }

    pub fn constant(value: ScalarValue) -> Self {
        Self {
            scalar_type: Some(value.scalar_type()),
            value: Some(value),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.scalar_type.is_some()
    }
}

/// Half-scale pyramid: level `k` is `ceil(w / 2^k) x ceil(h / 2^k)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyramidMeta {
    pub levels: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<PixelFormat>,
}

impl PyramidMeta {
    pub fn new(levels: u32, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            levels: Some(levels),
            width: Some(width),
            height: Some(height),
            format: Some(format),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.levels.is_some() && self.width.is_some() && self.height.is_some() && self.format.is_some()
    }

    pub fn level_dims(&self, level: u32) -> Option<(u32, u32)> {
        let (width, height) = (self.width?, self.height?);
        let scale = 1u64 << level.min(31);
        let shrink = |extent: u32| ((extent as u64 + scale - 1) / scale).max(1) as u32;
        Some((shrink(width), shrink(height)))
    }

    pub fn level_meta(&self, level: u32) -> Option<ImageMeta> {
        let (width, height) = self.level_dims(level)?;
        Some(ImageMeta::new(width, height, self.format?))
    }
}

/// Ring of `slots` images sharing one template; always fully specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayMeta {
    pub slots: u32,
    pub template: ImageMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ObjectMeta {
    Image(ImageMeta),
    Array(ArrayMeta),
    Scalar(ScalarMeta),
    Pyramid(PyramidMeta),
    Delay(DelayMeta),
}

/// A field that was already set to a different value than the one inferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldConflict {
    pub field: String,
    pub existing: String,
    pub inferred: String,
}

fn merge_field<T>(field: &str, slot: &mut Option<T>, inferred: Option<T>) -> Result<bool, FieldConflict>
where
    T: PartialEq + Copy + fmt::Debug,
{
    match (*slot, inferred) {
        (_, None) => Ok(false),
        (None, Some(value)) => {
            *slot = Some(value);
            Ok(true)
        }
        (Some(existing), Some(value)) if existing == value => Ok(false),
        (Some(existing), Some(value)) => Err(FieldConflict {
            field: field.to_string(),
            existing: format!("{existing:?}"),
            inferred: format!("{value:?}"),
        }),
    }
}

impl ObjectMeta {
    pub fn kind(&self) -> DataKind {
        match self {
            ObjectMeta::Image(_) => DataKind::Image,
            ObjectMeta::Array(_) => DataKind::Array,
            ObjectMeta::Scalar(_) => DataKind::Scalar,
            ObjectMeta::Pyramid(_) => DataKind::Pyramid,
            ObjectMeta::Delay(_) => DataKind::Delay,
        }
    }

    pub fn is_resolved(&self) -> bool {
        match self {
            ObjectMeta::Image(meta) => meta.is_resolved(),
            ObjectMeta::Array(meta) => meta.is_resolved(),
            ObjectMeta::Scalar(meta) => meta.is_resolved(),
            ObjectMeta::Pyramid(meta) => meta.is_resolved(),
            ObjectMeta::Delay(meta) => meta.template.is_resolved(),
        }
    }

    pub fn as_image(&self) -> Option<&ImageMeta> {
        match self {
            ObjectMeta::Image(meta) => Some(meta),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayMeta> {
        match self {
            ObjectMeta::Array(meta) => Some(meta),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarMeta> {
        match self {
            ObjectMeta::Scalar(meta) => Some(meta),
            _ => None,
        }
    }

    pub fn as_pyramid(&self) -> Option<&PyramidMeta> {
        match self {
            ObjectMeta::Pyramid(meta) => Some(meta),
            _ => None,
        }
    }

    pub fn as_delay(&self) -> Option<&DelayMeta> {
        match self {
            ObjectMeta::Delay(meta) => Some(meta),
            _ => None,
        }
    }

    /// Fill unset fields from `inferred`; set fields must agree.
    ///
    /// Returns whether any field changed.
    pub fn merge(&mut self, inferred: &ObjectMeta) -> Result<bool, FieldConflict> {
        match (self, inferred) {
            (ObjectMeta::Image(current), ObjectMeta::Image(next)) => {
                let mut changed = merge_field("width", &mut current.width, next.width)?;
                changed |= merge_field("height", &mut current.height, next.height)?;
                changed |= merge_field("format", &mut current.format, next.format)?;
                Ok(changed)
            }
            (ObjectMeta::Array(current), ObjectMeta::Array(next)) => {
                let mut changed = merge_field("item type", &mut current.item_type, next.item_type)?;
                changed |= merge_field("capacity", &mut current.capacity, next.capacity)?;
                Ok(changed)
            }
            (ObjectMeta::Scalar(current), ObjectMeta::Scalar(next)) => {
                let mut changed =
                    merge_field("scalar type", &mut current.scalar_type, next.scalar_type)?;
                changed |= merge_field("value", &mut current.value, next.value)?;
                Ok(changed)
            }
            (ObjectMeta::Pyramid(current), ObjectMeta::Pyramid(next)) => {
                let mut changed = merge_field("levels", &mut current.levels, next.levels)?;
                changed |= merge_field("width", &mut current.width, next.width)?;
                changed |= merge_field("height", &mut current.height, next.height)?;
                changed |= merge_field("format", &mut current.format, next.format)?;
                Ok(changed)
            }
            (ObjectMeta::Delay(current), ObjectMeta::Delay(next)) if current == next => Ok(false),
            (current, next) => Err(FieldConflict {
                field: "kind".to_string(),
                existing: format!("{current:?}"),
                inferred: format!("{next:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelaySlot {
    pub delay: ObjectId,
    pub age: u32,
}

/// A registered data object with the metadata its creator declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataObject {
    pub id: ObjectId,
    pub meta: ObjectMeta,
    pub is_virtual: bool,
    pub marked_output: bool,
    pub delay_slot: Option<DelaySlot>,
}

impl DataObject {
    pub fn kind(&self) -> DataKind {
        self.meta.kind()
    }

    pub fn constant(&self) -> Option<ScalarValue> {
        if !self.is_virtual {
            return None;
        }
        self.meta.as_scalar().and_then(|scalar| scalar.value)
    }

    pub fn is_constant(&self) -> bool {
        self.constant().is_some()
    }

    /// Observable from outside the graph: never eliminated or fused away.
    pub fn is_external(&self) -> bool {
        !self.is_virtual || self.marked_output
    }

    /// Passed as its own handle to the native entry point; delay slots travel with their delay.
    pub fn is_entry(&self) -> bool {
        self.is_external() && self.delay_slot.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_fills_unset_fields_once() {
        let mut meta = ObjectMeta::Image(ImageMeta {
            width: Some(64),
            ..ImageMeta::default()
        });
        let changed = meta
            .merge(&ObjectMeta::Image(ImageMeta::new(64, 32, PixelFormat::U8)))
            .expect("compatible inference");
        assert!(changed);
        assert!(meta.is_resolved());

        let unchanged = meta
            .merge(&ObjectMeta::Image(ImageMeta::new(64, 32, PixelFormat::U8)))
            .expect("same inference");
        assert!(!unchanged);
    }

    #[test]
    fn merge_reports_conflicting_field() {
        let mut meta = ObjectMeta::Image(ImageMeta::new(64, 32, PixelFormat::U8));
        let conflict = meta
            .merge(&ObjectMeta::Image(ImageMeta::new(64, 32, PixelFormat::S16)))
            .expect_err("format differs");
        assert_eq!(conflict.field, "format");
        assert_eq!(conflict.existing, "U8");
        assert_eq!(conflict.inferred, "S16");
    }

    #[test]
    fn merge_rejects_kind_change() {
        let mut meta = ObjectMeta::Scalar(ScalarMeta::of_type(ScalarType::U8));
        let conflict = meta
            .merge(&ObjectMeta::Array(ArrayMeta::new(ItemType::U8, 4)))
            .expect_err("kind differs");
        assert_eq!(conflict.field, "kind");
    }

    #[test]
    fn pyramid_levels_round_up() {
        let pyramid = PyramidMeta::new(4, 13, 7, PixelFormat::U8);
        assert_eq!(pyramid.level_dims(0), Some((13, 7)));
        assert_eq!(pyramid.level_dims(1), Some((7, 4)));
        assert_eq!(pyramid.level_dims(2), Some((4, 2)));
        assert_eq!(pyramid.level_dims(3), Some((2, 1)));
    }

    #[test]
    fn constants_render_as_c_literals() {
        assert_eq!(ScalarValue::U8(7).c_literal(), "((uint8_t)7)");
        assert_eq!(ScalarValue::Enum(0xA001).c_literal(), "40961u");
        assert_eq!(ScalarValue::F32(0.5).c_literal(), "(0.5f)");
        assert_eq!(ScalarValue::F32(2.0).c_literal(), "(2.0f)");
        assert_eq!(ScalarValue::S16(-3).c_literal(), "((int16_t)-3)");
    }

    #[test]
    fn constant_scalars_are_graph_owned() {
        let object = DataObject {
            id: ObjectId(0),
            meta: ObjectMeta::Scalar(ScalarMeta::constant(ScalarValue::U8(3))),
            is_virtual: true,
            marked_output: false,
            delay_slot: None,
        };
        assert!(object.is_constant());
        assert!(!object.is_external());
    }
}
