//! Capability descriptors and the share-compatibility verdict
//!
//! Two contexts may only share objects when the driver would let them.
//! The verdict here is a pure function over two descriptors so it can be
//! consulted before any native call is made and tested in isolation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Rendering API profile requested for a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// Desktop GL 2.x
    Gl2,
    /// Desktop GL 3.x core
    Gl3Core,
    /// Desktop GL 3.x with compatibility
    Gl3Compat,
    /// Desktop GL 4.x core
    Gl4Core,
    /// Desktop GL 4.x with compatibility
    Gl4Compat,
    /// Embedded GL ES 2
    Es2,
    /// Embedded GL ES 3
    Es3,
}

/// API family a profile belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiFamily {
    Desktop,
    Embedded,
}

impl Profile {
    pub fn family(&self) -> ApiFamily {
        match self {
            Profile::Es2 | Profile::Es3 => ApiFamily::Embedded,
            _ => ApiFamily::Desktop,
        }
    }

    /// Core profiles drop the fixed-function object types.
    pub fn is_core(&self) -> bool {
        matches!(self, Profile::Gl3Core | Profile::Gl4Core)
    }

    /// Profiles predating the core/compatibility split.
    pub fn is_legacy(&self) -> bool {
        matches!(self, Profile::Gl2)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Gl2 => "gl2",
            Profile::Gl3Core => "gl3-core",
            Profile::Gl3Compat => "gl3-compat",
            Profile::Gl4Core => "gl4-core",
            Profile::Gl4Compat => "gl4-compat",
            Profile::Es2 => "es2",
            Profile::Es3 => "es3",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities requested for a rendering context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub profile: Profile,
    pub color_bits: u8,
    pub alpha_bits: u8,
    pub depth_bits: u8,
    pub stencil_bits: u8,
    pub double_buffered: bool,
    /// Hardware renderer vs software rasterizer
    pub hardware_accelerated: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            profile: Profile::Es2,
            color_bits: 24,
            alpha_bits: 8,
            depth_bits: 24,
            stencil_bits: 8,
            double_buffered: true,
            hardware_accelerated: true,
        }
    }
}

impl Capabilities {
    pub fn with_profile(profile: Profile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }
}

/// Reason two capability descriptors cannot share a group.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityMismatch {
    #[error("api family differs (master {master}, requested {requested})")]
    ApiFamily { master: Profile, requested: Profile },

    #[error("renderer differs (master hardware={master}, requested hardware={requested})")]
    Renderer { master: bool, requested: bool },

    #[error("profile {requested} cannot share objects with {master}")]
    ProfileLattice { master: Profile, requested: Profile },
}

/// Decides whether a context with `requested` capabilities may join the
/// sharing group of a master created with `master` capabilities.
///
/// Rules, in order:
/// - desktop and embedded profiles never share
/// - hardware and software renderers never share
/// - a core profile never shares with a legacy (GL2) profile
///
/// Framebuffer bit depths and buffering do not take part; sharing is about
/// the object namespace, not the surface.
pub fn check_share_compatibility(
    master: &Capabilities,
    requested: &Capabilities,
) -> Result<(), CapabilityMismatch> {
    if master.profile.family() != requested.profile.family() {
        return Err(CapabilityMismatch::ApiFamily {
            master: master.profile,
            requested: requested.profile,
        });
    }

    if master.hardware_accelerated != requested.hardware_accelerated {
        return Err(CapabilityMismatch::Renderer {
            master: master.hardware_accelerated,
            requested: requested.hardware_accelerated,
        });
    }

    let core_legacy_mix = (master.profile.is_core() && requested.profile.is_legacy())
        || (master.profile.is_legacy() && requested.profile.is_core());
    if core_legacy_mix {
        return Err(CapabilityMismatch::ProfileLattice {
            master: master.profile,
            requested: requested.profile,
        });
    }

    Ok(())
}
