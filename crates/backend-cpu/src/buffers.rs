//! Host-side storage for entry objects.
//!
//! Every buffer keeps its bytes in `u64` words so the pointers handed to
//! generated code are aligned for any element type.

use bytemuck::{Pod, Zeroable};
use ndarray::{Array2, ArrayView2};
use std::collections::BTreeMap;
use std::ffi::c_void;
use vxforge_ir::{
    ArrayMeta, DataKind, DelayMeta, ImageMeta, ItemType, ObjectId, ObjectMeta, PixelFormat,
    PyramidMeta, ScalarType, ScalarValue, VxError, VxResult,
};

/// Matches `vxf_coordinates2d_t`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Coordinates2d {
    pub x: i32,
    pub y: i32,
}

fn words(bytes: usize) -> Vec<u64> {
    vec![0u64; bytes.div_ceil(8).max(1)]
}

fn widen<T: Copy + Into<f64>>(values: &[T]) -> Vec<f64> {
    values.iter().map(|&value| value.into()).collect()
}

fn unresolved(what: &str) -> VxError {
    VxError::Buffer(format!("{what} metadata is not fully resolved"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u64>,
}

impl ImageBuffer {
    /// Zero-filled image.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let bytes = width as usize * height as usize * format.pixel_size();
        Self {
            width,
            height,
            format,
            data: words(bytes),
        }
    }

    pub fn from_meta(meta: &ImageMeta) -> VxResult<Self> {
        match (meta.width, meta.height, meta.format) {
            (Some(width), Some(height), Some(format)) => Ok(Self::new(width, height, format)),
            _ => Err(unresolved("image")),
        }
    }

    /// Copy from a `height x (width * channels)` array.
    pub fn from_array2<T: Pod>(format: PixelFormat, array: ArrayView2<'_, T>) -> VxResult<Self> {
        let (rows, cols) = array.dim();
        let channels = format.channels();
        if cols % channels != 0 {
            return Err(VxError::Buffer(format!(
                "{cols} columns do not divide into {channels}-channel pixels"
            )));
        }
        let mut image = Self::new((cols / channels) as u32, rows as u32, format);
        let dst = image.as_mut_slice::<T>()?;
        for (dst, src) in dst.iter_mut().zip(array.iter()) {
            *dst = *src;
        }
        Ok(image)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn meta(&self) -> ImageMeta {
        ImageMeta::new(self.width, self.height, self.format)
    }

    /// Channel elements, not pixels.
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.channels()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len() * self.format.element_size()
    }

    pub fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.data)[..self.byte_len()]
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.byte_len();
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.data)[..len]
    }

    fn check_element<T>(&self) -> VxResult<()> {
        let size = std::mem::size_of::<T>();
        if size != self.format.element_size() {
            return Err(VxError::Buffer(format!(
                "{}-byte view of a {} image",
                size, self.format
            )));
        }
        Ok(())
    }

    pub fn as_slice<T: Pod>(&self) -> VxResult<&[T]> {
        self.check_element::<T>()?;
        bytemuck::try_cast_slice(self.bytes()).map_err(|err| VxError::Buffer(err.to_string()))
    }

    pub fn as_mut_slice<T: Pod>(&mut self) -> VxResult<&mut [T]> {
        self.check_element::<T>()?;
        bytemuck::try_cast_slice_mut(self.bytes_mut()).map_err(|err| VxError::Buffer(err.to_string()))
    }

    pub fn to_array2<T: Pod>(&self) -> VxResult<Array2<T>> {
        let values = self.as_slice::<T>()?.to_vec();
        let shape = (self.height as usize, self.width as usize * self.format.channels());
        Array2::from_shape_vec(shape, values).map_err(|err| VxError::Buffer(err.to_string()))
    }

    /// Every channel element widened to `f64`, row-major.
    pub fn values_f64(&self) -> VxResult<Vec<f64>> {
        let values = match self.format {
            PixelFormat::U8 | PixelFormat::Rgb | PixelFormat::Rgbx => widen(self.as_slice::<u8>()?),
            PixelFormat::U16 => widen(self.as_slice::<u16>()?),
            PixelFormat::S16 => widen(self.as_slice::<i16>()?),
            PixelFormat::U32 => widen(self.as_slice::<u32>()?),
            PixelFormat::S32 => widen(self.as_slice::<i32>()?),
            PixelFormat::F32 => widen(self.as_slice::<f32>()?),
        };
        Ok(values)
    }

    pub fn fill<T: Pod>(&mut self, value: T) -> VxResult<()> {
        self.as_mut_slice::<T>()?.fill(value);
        Ok(())
    }

    fn as_mut_ptr(&mut self) -> *mut c_void {
        self.data.as_mut_ptr().cast()
    }
}

/// One scalar value, stored at offset zero of an aligned word.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarBuffer {
    scalar_type: ScalarType,
    data: u64,
}

impl ScalarBuffer {
    pub fn new(scalar_type: ScalarType) -> Self {
        Self { scalar_type, data: 0 }
    }

    pub fn from_value(value: ScalarValue) -> Self {
        let mut scalar = Self::new(value.scalar_type());
        scalar.write(value);
        scalar
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    pub fn value(&self) -> ScalarValue {
        let bytes = bytemuck::bytes_of(&self.data);
        let b2 = [bytes[0], bytes[1]];
        let b4 = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self.scalar_type {
            ScalarType::U8 => ScalarValue::U8(bytes[0]),
            ScalarType::U16 => ScalarValue::U16(u16::from_ne_bytes(b2)),
            ScalarType::S16 => ScalarValue::S16(i16::from_ne_bytes(b2)),
            ScalarType::U32 => ScalarValue::U32(u32::from_ne_bytes(b4)),
            ScalarType::S32 => ScalarValue::S32(i32::from_ne_bytes(b4)),
            ScalarType::F32 => ScalarValue::F32(f32::from_ne_bytes(b4)),
            ScalarType::Bool => ScalarValue::Bool(i32::from_ne_bytes(b4) != 0),
            ScalarType::Enum => ScalarValue::Enum(u32::from_ne_bytes(b4)),
        }
    }

    pub fn set(&mut self, value: ScalarValue) -> VxResult<()> {
        if value.scalar_type() != self.scalar_type {
            return Err(VxError::Buffer(format!(
                "cannot store {} in a {} scalar",
                value.scalar_type(),
                self.scalar_type
            )));
        }
        self.write(value);
        Ok(())
    }

    fn write(&mut self, value: ScalarValue) {
        let encoded: Vec<u8> = match value {
            ScalarValue::U8(v) => vec![v],
            ScalarValue::U16(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::S16(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::U32(v) | ScalarValue::Enum(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::S32(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::F32(v) => v.to_ne_bytes().to_vec(),
            ScalarValue::Bool(v) => i32::from(v).to_ne_bytes().to_vec(),
        };
        self.data = 0;
        bytemuck::bytes_of_mut(&mut self.data)[..encoded.len()].copy_from_slice(&encoded);
    }

    fn as_mut_ptr(&mut self) -> *mut c_void {
        (&mut self.data as *mut u64).cast()
    }
}

/// Bounded item list; generated code may change `len` up to `capacity`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayBuffer {
    item_type: ItemType,
    capacity: usize,
    num_items: usize,
    data: Vec<u64>,
}

/// Header passed to generated code, laid out as `vxf_array_t`.
#[repr(C)]
#[derive(Debug)]
pub(crate) struct RawArray {
    pub items: *mut c_void,
    pub num_items: u64,
    pub capacity: u64,
}

impl ArrayBuffer {
    pub fn new(item_type: ItemType, capacity: usize) -> Self {
        Self {
            item_type,
            capacity,
            num_items: 0,
            data: words(capacity * item_type.size()),
        }
    }

    pub fn from_meta(meta: &ArrayMeta) -> VxResult<Self> {
        match (meta.item_type, meta.capacity) {
            (Some(item_type), Some(capacity)) => Ok(Self::new(item_type, capacity as usize)),
            _ => Err(unresolved("array")),
        }
    }

    pub fn from_items<T: Pod>(item_type: ItemType, capacity: usize, items: &[T]) -> VxResult<Self> {
        let mut array = Self::new(item_type, capacity);
        array.set_items(items)?;
        Ok(array)
    }

    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.num_items
    }

    pub fn is_empty(&self) -> bool {
        self.num_items == 0
    }

    pub fn meta(&self) -> ArrayMeta {
        ArrayMeta::new(self.item_type, self.capacity as u32)
    }

    fn storage<T: Pod>(&self) -> VxResult<&[T]> {
        self.check_item::<T>()?;
        let bytes = &bytemuck::cast_slice::<u64, u8>(&self.data)[..self.capacity * self.item_type.size()];
        bytemuck::try_cast_slice(bytes).map_err(|err| VxError::Buffer(err.to_string()))
    }

    fn check_item<T>(&self) -> VxResult<()> {
        if std::mem::size_of::<T>() != self.item_type.size() {
            return Err(VxError::Buffer(format!(
                "{}-byte view of {} items",
                std::mem::size_of::<T>(),
                self.item_type
            )));
        }
        Ok(())
    }

    /// The first `len()` items.
    pub fn items<T: Pod>(&self) -> VxResult<&[T]> {
        Ok(&self.storage::<T>()?[..self.num_items])
    }

    pub fn set_items<T: Pod>(&mut self, items: &[T]) -> VxResult<()> {
        self.check_item::<T>()?;
        if items.len() > self.capacity {
            return Err(VxError::Buffer(format!(
                "{} items exceed capacity {}",
                items.len(),
                self.capacity
            )));
        }
        let len = self.capacity * self.item_type.size();
        let bytes = &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.data)[..len];
        let dst: &mut [T] = bytemuck::try_cast_slice_mut(bytes).map_err(|err| VxError::Buffer(err.to_string()))?;
        dst[..items.len()].copy_from_slice(items);
        self.num_items = items.len();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.num_items = 0;
    }

    pub(crate) fn raw(&mut self) -> RawArray {
        RawArray {
            items: self.data.as_mut_ptr().cast(),
            num_items: self.num_items as u64,
            capacity: self.capacity as u64,
        }
    }

    pub(crate) fn sync_len(&mut self, num_items: u64) {
        self.num_items = (num_items as usize).min(self.capacity);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PyramidBuffer {
    meta: PyramidMeta,
    levels: Vec<ImageBuffer>,
}

impl PyramidBuffer {
    pub fn new(levels: u32, width: u32, height: u32, format: PixelFormat) -> Self {
        let meta = PyramidMeta::new(levels, width, height, format);
        let levels = (0..levels)
            .map(|level| {
                let (w, h) = meta.level_dims(level).unwrap_or((width, height));
                ImageBuffer::new(w, h, format)
            })
            .collect();
        Self { meta, levels }
    }

    pub fn from_meta(meta: &PyramidMeta) -> VxResult<Self> {
        match (meta.levels, meta.width, meta.height, meta.format) {
            (Some(levels), Some(width), Some(height), Some(format)) => Ok(Self::new(levels, width, height, format)),
            _ => Err(unresolved("pyramid")),
        }
    }

    pub fn meta(&self) -> PyramidMeta {
        self.meta
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> Option<&ImageBuffer> {
        self.levels.get(level)
    }

    pub fn level_mut(&mut self, level: usize) -> Option<&mut ImageBuffer> {
        self.levels.get_mut(level)
    }

    pub fn levels(&self) -> &[ImageBuffer] {
        &self.levels
    }

    fn level_ptrs(&mut self) -> Vec<*mut c_void> {
        self.levels.iter_mut().map(ImageBuffer::as_mut_ptr).collect()
    }
}

/// Ring of images; slot 0 is the current one and higher ages are older.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayBuffer {
    template: ImageMeta,
    slots: Vec<ImageBuffer>,
    head: usize,
}

impl DelayBuffer {
    pub fn new(slots: u32, template: ImageMeta) -> VxResult<Self> {
        if slots == 0 {
            return Err(VxError::Buffer("a delay needs at least one slot".to_string()));
        }
        let slots = (0..slots)
            .map(|_| ImageBuffer::from_meta(&template))
            .collect::<VxResult<Vec<_>>>()?;
        Ok(Self {
            template,
            slots,
            head: 0,
        })
    }

    pub fn from_meta(meta: &DelayMeta) -> VxResult<Self> {
        Self::new(meta.slots, meta.template)
    }

    pub fn meta(&self) -> DelayMeta {
        DelayMeta {
            slots: self.slots.len() as u32,
            template: self.template,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn index(&self, age: usize) -> usize {
        (self.head + age) % self.slots.len()
    }

    pub fn slot(&self, age: usize) -> Option<&ImageBuffer> {
        if age >= self.slots.len() {
            return None;
        }
        self.slots.get(self.index(age))
    }

    pub fn slot_mut(&mut self, age: usize) -> Option<&mut ImageBuffer> {
        if age >= self.slots.len() {
            return None;
        }
        let index = self.index(age);
        self.slots.get_mut(index)
    }

    /// Shift every slot one age older; the oldest buffer becomes slot 0.
    pub fn age(&mut self) {
        let n = self.slots.len();
        self.head = (self.head + n - 1) % n;
    }

    fn slot_ptrs(&mut self) -> Vec<*mut c_void> {
        let n = self.slots.len();
        let head = self.head;
        let mut ptrs: Vec<*mut c_void> = self.slots.iter_mut().map(ImageBuffer::as_mut_ptr).collect();
        ptrs.rotate_left(head % n);
        ptrs
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostObject {
    Image(ImageBuffer),
    Scalar(ScalarBuffer),
    Array(ArrayBuffer),
    Pyramid(PyramidBuffer),
    Delay(DelayBuffer),
}

impl HostObject {
    /// Zero-filled storage matching resolved metadata.
    pub fn from_meta(meta: &ObjectMeta) -> VxResult<Self> {
        Ok(match meta {
            ObjectMeta::Image(image) => HostObject::Image(ImageBuffer::from_meta(image)?),
            ObjectMeta::Scalar(scalar) => {
                let scalar_type = scalar.scalar_type.ok_or_else(|| unresolved("scalar"))?;
                match scalar.value {
                    Some(value) => HostObject::Scalar(ScalarBuffer::from_value(value)),
                    None => HostObject::Scalar(ScalarBuffer::new(scalar_type)),
                }
            }
            ObjectMeta::Array(array) => HostObject::Array(ArrayBuffer::from_meta(array)?),
            ObjectMeta::Pyramid(pyramid) => HostObject::Pyramid(PyramidBuffer::from_meta(pyramid)?),
            ObjectMeta::Delay(delay) => HostObject::Delay(DelayBuffer::from_meta(delay)?),
        })
    }

    pub fn kind(&self) -> DataKind {
        match self {
            HostObject::Image(_) => DataKind::Image,
            HostObject::Scalar(_) => DataKind::Scalar,
            HostObject::Array(_) => DataKind::Array,
            HostObject::Pyramid(_) => DataKind::Pyramid,
            HostObject::Delay(_) => DataKind::Delay,
        }
    }

    /// Why this buffer cannot stand in for an object described by `meta`.
    pub fn mismatch(&self, meta: &ObjectMeta) -> Option<String> {
        match (self, meta) {
            (HostObject::Image(image), ObjectMeta::Image(expected)) => {
                (image.meta() != *expected).then(|| describe_image(&image.meta(), expected))
            }
            (HostObject::Scalar(scalar), ObjectMeta::Scalar(expected)) => {
                (Some(scalar.scalar_type()) != expected.scalar_type).then(|| {
                    format!(
                        "scalar type {}, expected {:?}",
                        scalar.scalar_type(),
                        expected.scalar_type
                    )
                })
            }
            (HostObject::Array(array), ObjectMeta::Array(expected)) => (array.meta() != *expected).then(|| {
                format!(
                    "{} items with capacity {}, expected {:?} with capacity {:?}",
                    array.item_type(),
                    array.capacity(),
                    expected.item_type,
                    expected.capacity
                )
            }),
            (HostObject::Pyramid(pyramid), ObjectMeta::Pyramid(expected)) => {
                (pyramid.meta() != *expected).then(|| format!("pyramid {:?}, expected {expected:?}", pyramid.meta()))
            }
            (HostObject::Delay(delay), ObjectMeta::Delay(expected)) => (delay.meta() != *expected).then(|| {
                format!(
                    "{} slots of {}, expected {} slots of {}",
                    delay.slot_count(),
                    describe(&delay.template),
                    expected.slots,
                    describe(&expected.template)
                )
            }),
            (other, expected) => Some(format!("expected {} object, bound {} object", expected.kind(), other.kind())),
        }
    }
}

fn describe(meta: &ImageMeta) -> String {
    match (meta.width, meta.height, meta.format) {
        (Some(width), Some(height), Some(format)) => format!("{width}x{height} {format}"),
        _ => format!("{meta:?}"),
    }
}

fn describe_image(bound: &ImageMeta, expected: &ImageMeta) -> String {
    format!("image is {}, expected {}", describe(bound), describe(expected))
}

/// Host storage for one execution, keyed by object id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    objects: BTreeMap<ObjectId, HostObject>,
}

macro_rules! accessors {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        pub fn $get(&self, id: ObjectId) -> Option<&$ty> {
            match self.objects.get(&id) {
                Some(HostObject::$variant(value)) => Some(value),
                _ => None,
            }
        }

        pub fn $get_mut(&mut self, id: ObjectId) -> Option<&mut $ty> {
            match self.objects.get_mut(&id) {
                Some(HostObject::$variant(value)) => Some(value),
                _ => None,
            }
        }
    };
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previously bound object, if any.
    pub fn insert(&mut self, id: ObjectId, object: HostObject) -> Option<HostObject> {
        self.objects.insert(id, object)
    }

    pub fn with(mut self, id: ObjectId, object: HostObject) -> Self {
        self.objects.insert(id, object);
        self
    }

    pub fn bind_image(&mut self, id: ObjectId, image: ImageBuffer) -> Option<HostObject> {
        self.insert(id, HostObject::Image(image))
    }

    pub fn bind_scalar(&mut self, id: ObjectId, value: ScalarValue) -> Option<HostObject> {
        self.insert(id, HostObject::Scalar(ScalarBuffer::from_value(value)))
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<HostObject> {
        self.objects.remove(&id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&HostObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut HostObject> {
        self.objects.get_mut(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &HostObject)> {
        self.objects.iter().map(|(id, object)| (*id, object))
    }

    accessors!(image, image_mut, Image, ImageBuffer);
    accessors!(scalar, scalar_mut, Scalar, ScalarBuffer);
    accessors!(array, array_mut, Array, ArrayBuffer);
    accessors!(pyramid, pyramid_mut, Pyramid, PyramidBuffer);
    accessors!(delay, delay_mut, Delay, DelayBuffer);

    pub(crate) fn objects_mut(&mut self) -> impl Iterator<Item = (ObjectId, &mut HostObject)> {
        self.objects.iter_mut().map(|(id, object)| (*id, object))
    }
}

/// What one entry handle points at during a call.
pub(crate) enum Marshalled {
    Direct(*mut c_void),
    Array(RawArray),
    Table(Vec<*mut c_void>),
}

impl HostObject {
    pub(crate) fn marshal(&mut self) -> Marshalled {
        match self {
            HostObject::Image(image) => Marshalled::Direct(image.as_mut_ptr()),
            HostObject::Scalar(scalar) => Marshalled::Direct(scalar.as_mut_ptr()),
            HostObject::Array(array) => Marshalled::Array(array.raw()),
            HostObject::Pyramid(pyramid) => Marshalled::Table(pyramid.level_ptrs()),
            HostObject::Delay(delay) => Marshalled::Table(delay.slot_ptrs()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn image_views_check_element_size() -> VxResult<()> {
        let mut image = ImageBuffer::new(3, 2, PixelFormat::S16);
        image.as_mut_slice::<i16>()?[4] = -7;
        assert_eq!(image.byte_len(), 12);
        assert!(image.as_slice::<u8>().is_err());
        let view = image.to_array2::<i16>()?;
        assert_eq!(view[[1, 1]], -7);
        Ok(())
    }

    #[test]
    fn array2_round_trip_keeps_rows() -> VxResult<()> {
        let pixels = array![[1u8, 2, 3], [4, 5, 6]];
        let image = ImageBuffer::from_array2(PixelFormat::U8, pixels.view())?;
        assert_eq!((image.width(), image.height()), (3, 2));
        assert_eq!(image.to_array2::<u8>()?, pixels);
        Ok(())
    }

    #[test]
    fn rgb_columns_must_divide_into_pixels() {
        let pixels = array![[1u8, 2, 3, 4]];
        assert!(ImageBuffer::from_array2(PixelFormat::Rgb, pixels.view()).is_err());
    }

    #[test]
    fn scalar_values_survive_storage() -> VxResult<()> {
        let mut scalar = ScalarBuffer::new(ScalarType::F32);
        scalar.set(ScalarValue::F32(1.5))?;
        assert_eq!(scalar.value(), ScalarValue::F32(1.5));
        assert!(scalar.set(ScalarValue::U8(1)).is_err());
        assert_eq!(ScalarBuffer::from_value(ScalarValue::S16(-3)).value(), ScalarValue::S16(-3));
        Ok(())
    }

    #[test]
    fn array_items_respect_capacity() -> VxResult<()> {
        let mut array = ArrayBuffer::new(ItemType::Coordinates2d, 2);
        let points = [Coordinates2d { x: 1, y: 2 }, Coordinates2d { x: 3, y: 4 }];
        array.set_items(&points)?;
        assert_eq!(array.items::<Coordinates2d>()?, &points);
        assert!(array.set_items(&[Coordinates2d::default(); 3]).is_err());
        array.sync_len(10);
        assert_eq!(array.len(), 2);
        Ok(())
    }

    #[test]
    fn delay_aging_rotates_slots() -> VxResult<()> {
        let mut delay = DelayBuffer::new(3, ImageMeta::new(1, 1, PixelFormat::U8))?;
        for age in 0..3 {
            if let Some(slot) = delay.slot_mut(age) {
                slot.fill(age as u8 + 10)?;
            }
        }
        delay.age();
        let values: Vec<u8> = (0..3)
            .filter_map(|age| delay.slot(age).map(|slot| slot.bytes()[0]))
            .collect();
        assert_eq!(values, vec![12, 10, 11]);

        let ptrs = delay.slot_ptrs();
        assert_eq!(ptrs.len(), 3);
        assert_eq!(ptrs[0] as *const u8, delay.slot(0).map_or(std::ptr::null(), |s| s.bytes().as_ptr()));
        Ok(())
    }

    #[test]
    fn mismatch_names_the_difference() {
        let bound = HostObject::Image(ImageBuffer::new(4, 4, PixelFormat::U8));
        let expected = ObjectMeta::Image(ImageMeta::new(8, 4, PixelFormat::U8));
        let reason = bound.mismatch(&expected).unwrap_or_default();
        assert!(reason.contains("4x4 u8"));
        assert!(reason.contains("8x4 u8"));

        let expected = ObjectMeta::Array(ArrayMeta::new(ItemType::U8, 4));
        let reason = bound.mismatch(&expected).unwrap_or_default();
        assert_eq!(reason, "expected array object, bound image object");
    }
}
