//! Native rendering surfaces
//!
//! A [`Drawable`] is owned independently of any context. Contexts and render
//! targets hold it through an `Arc`; the provider that created it is the only
//! one allowed to tear it down.

use crate::error::DrawableError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_DRAWABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique drawable identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawableId(u64);

impl DrawableId {
    fn next() -> Self {
        DrawableId(NEXT_DRAWABLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DrawableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

/// Backing store of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    /// On-screen window surface
    Window,
    /// Off-screen pixel buffer
    Pbuffer,
    /// Framebuffer object
    Fbo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferingMode {
    Single,
    Double,
}

/// Surface size in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Parameters for creating a drawable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceDescriptor {
    pub kind: SurfaceKind,
    pub buffering: BufferingMode,
    pub width: u32,
    pub height: u32,
}

impl Default for SurfaceDescriptor {
    fn default() -> Self {
        Self {
            kind: SurfaceKind::Window,
            buffering: BufferingMode::Double,
            width: 640,
            height: 480,
        }
    }
}

impl SurfaceDescriptor {
    pub fn new(kind: SurfaceKind, width: u32, height: u32) -> Self {
        Self {
            kind,
            width,
            height,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), DrawableError> {
        if self.width == 0 || self.height == 0 {
            return Err(DrawableError::ZeroSize {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

/// A native rendering surface.
#[derive(Debug)]
pub struct Drawable {
    id: DrawableId,
    kind: SurfaceKind,
    buffering: BufferingMode,
    size: RwLock<Size>,
    valid: AtomicBool,
}

impl Drawable {
    /// Builds the bookkeeping half of a drawable. Providers call this after
    /// the native surface exists.
    pub fn new(descriptor: &SurfaceDescriptor) -> Result<Arc<Self>, DrawableError> {
        descriptor.validate()?;
        Ok(Arc::new(Self {
            id: DrawableId::next(),
            kind: descriptor.kind,
            buffering: descriptor.buffering,
            size: RwLock::new(Size::new(descriptor.width, descriptor.height)),
            valid: AtomicBool::new(true),
        }))
    }

    pub fn id(&self) -> DrawableId {
        self.id
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    pub fn buffering(&self) -> BufferingMode {
        self.buffering
    }

    pub fn size(&self) -> Size {
        *self.size.read()
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Returns an error unless the surface can still be rendered into.
    pub fn ensure_valid(&self) -> Result<(), DrawableError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(DrawableError::Invalid(self.id))
        }
    }

    /// Records a new size. Providers call this from their `resize`.
    pub fn set_size(&self, width: u32, height: u32) -> Result<(), DrawableError> {
        self.ensure_valid()?;
        if width == 0 || height == 0 {
            return Err(DrawableError::ZeroSize { width, height });
        }
        *self.size.write() = Size::new(width, height);
        Ok(())
    }

    /// Marks the surface gone. Returns false if it already was.
    pub fn invalidate(&self) -> bool {
        self.valid.swap(false, Ordering::AcqRel)
    }
}

/// Supplied by the windowing / FBO / pixel-buffer layer.
pub trait DrawableProvider: Send + Sync {
    fn create_drawable(&self, descriptor: &SurfaceDescriptor) -> Result<Arc<Drawable>, DrawableError>;

    /// Tears down the native surface. Must tolerate already-invalid drawables.
    fn destroy_drawable(&self, drawable: &Drawable);

    fn resize(&self, drawable: &Drawable, width: u32, height: u32) -> Result<(), DrawableError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_rejected() {
        let desc = SurfaceDescriptor::new(SurfaceKind::Fbo, 0, 10);
        assert_eq!(
            Drawable::new(&desc).unwrap_err(),
            DrawableError::ZeroSize { width: 0, height: 10 }
        );
    }

    #[test]
    fn test_ids_are_unique() {
        let desc = SurfaceDescriptor::default();
        let a = Drawable::new(&desc).unwrap();
        let b = Drawable::new(&desc).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_invalidate_blocks_resize() {
        let drawable = Drawable::new(&SurfaceDescriptor::default()).unwrap();
        drawable.set_size(100, 50).unwrap();
        assert_eq!(drawable.size(), Size::new(100, 50));

        assert!(drawable.invalidate());
        assert!(!drawable.invalidate());
        assert_eq!(
            drawable.set_size(10, 10),
            Err(DrawableError::Invalid(drawable.id()))
        );
    }
}
