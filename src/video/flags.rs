//! Bit-flag sets reported by and passed to the DeckLink driver

macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(
                $(#[$fmeta:meta])*
                const $flag:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name($repr);

        impl $name {
            $(
                $(#[$fmeta])*
                pub const $flag: Self = Self($value);
            )*

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn from_bits(bits: $repr) -> Self {
                Self(bits)
            }

            pub const fn bits(self) -> $repr {
                self.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// All bits of `other` are set in `self`
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// At least one bit of `other` is set in `self`
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl std::ops::BitAnd for $name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut names = Vec::new();
                $(
                    if Self::$flag.0 != 0 && self.contains(Self::$flag) {
                        names.push(stringify!($flag));
                    }
                )*
                if names.is_empty() {
                    write!(f, "{}({:#x})", stringify!($name), self.0)
                } else {
                    write!(f, "{}({})", stringify!($name), names.join(" | "))
                }
            }
        }
    };
}

flag_set! {
    /// Physical video connectors
    pub struct VideoConnection: u32 {
        const UNSPECIFIED = 0;
        const SDI = 1 << 0;
        const HDMI = 1 << 1;
        const OPTICAL_SDI = 1 << 2;
        const COMPONENT = 1 << 3;
        const COMPOSITE = 1 << 4;
        const SVIDEO = 1 << 5;
    }
}

flag_set! {
    /// Directions a device can stream in
    pub struct VideoIoSupport: u32 {
        const CAPTURE = 1 << 0;
        const PLAYBACK = 1 << 1;
    }
}

flag_set! {
    /// Flags passed when enabling video input
    pub struct VideoInputFlags: u32 {
        const DEFAULT = 0;
        const ENABLE_FORMAT_DETECTION = 1 << 0;
        const DUAL_STREAM_3D = 1 << 1;
        const SYNCHRONIZE_TO_CAPTURE_GROUP = 1 << 2;
    }
}

flag_set! {
    /// What changed in an input format notification
    pub struct FormatChangedEvents: u32 {
        const DISPLAY_MODE_CHANGED = 1 << 0;
        const FIELD_DOMINANCE_CHANGED = 1 << 1;
        const COLORSPACE_CHANGED = 1 << 2;
    }
}

flag_set! {
    /// Signal properties sensed by input format detection
    pub struct DetectedFormatFlags: u32 {
        const YCBCR_422 = 1 << 0;
        const RGB_444 = 1 << 1;
        const DUAL_STREAM_3D = 1 << 2;
        const BIT_DEPTH_12 = 1 << 3;
        const BIT_DEPTH_10 = 1 << 4;
        const BIT_DEPTH_8 = 1 << 5;
    }
}

flag_set! {
    /// Constraints for video mode support queries
    pub struct SupportedVideoModeFlags: u32 {
        const DEFAULT = 0;
        const KEYING = 1 << 0;
        const DUAL_STREAM_3D = 1 << 1;
        const SDI_SINGLE_LINK = 1 << 2;
        const SDI_DUAL_LINK = 1 << 3;
        const SDI_QUAD_LINK = 1 << 4;
    }
}

flag_set! {
    /// Display mode properties
    pub struct DisplayModeFlags: u32 {
        const SUPPORTS_3D = 1 << 0;
        const COLORSPACE_REC601 = 1 << 1;
        const COLORSPACE_REC709 = 1 << 2;
    }
}

flag_set! {
    /// Per-frame flags
    pub struct FrameFlags: u32 {
        const DEFAULT = 0;
        const FLIP_VERTICAL = 1 << 0;
        const HAS_NO_INPUT_SOURCE = 1 << 31;
    }
}
