use serde::Serialize;

/// Fade state for one modality (text or icon) of a label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OpacityState {
    pub opacity: f32,
    pub placed: bool,
}

impl OpacityState {
    /// Advance `prev` by one commit, or start a fresh state.
    ///
    /// The time elapsed since the previous commit was spent animating toward
    /// the previous target, so the step direction comes from `prev.placed`.
    pub fn new(prev: Option<&OpacityState>, increment: f32, placed: bool, skip_fade: bool) -> Self {
        let opacity = match prev {
            Some(prev) => {
                let step = if prev.placed { increment } else { -increment };
                (prev.opacity + step).clamp(0.0, 1.0)
            }
            None if skip_fade && placed => 1.0,
            None => 0.0,
        };
        Self { opacity, placed }
    }

    pub fn is_hidden(&self) -> bool {
        self.opacity == 0.0 && !self.placed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JointOpacityState {
    pub text: OpacityState,
    pub icon: OpacityState,
}

impl JointOpacityState {
    pub fn new(
        prev: Option<&JointOpacityState>,
        increment: f32,
        placed_text: bool,
        placed_icon: bool,
        skip_fade: bool,
    ) -> Self {
        Self {
            text: OpacityState::new(prev.map(|p| &p.text), increment, placed_text, skip_fade),
            icon: OpacityState::new(prev.map(|p| &p.icon), increment, placed_icon, skip_fade),
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.text.is_hidden() && self.icon.is_hidden()
    }
}

/// Decision for one label in one placement pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JointPlacement {
    pub text: bool,
    pub icon: bool,
    /// Outside the viewport but inside the collision padding: when it scrolls
    /// into view it shows at full opacity without fading in.
    pub skip_fade: bool,
}

impl JointPlacement {
    pub fn new(text: bool, icon: bool, skip_fade: bool) -> Self {
        Self {
            text,
            icon,
            skip_fade,
        }
    }
}

/// Pack an opacity state into one `u32` covering all four corners of a glyph quad.
///
/// Each byte holds `floor(opacity * 127) << 1 | placed`.
pub fn pack_opacity(state: &OpacityState) -> u32 {
    if state.opacity == 0.0 && !state.placed {
        return 0;
    }
    if state.opacity == 1.0 && state.placed {
        return u32::MAX;
    }
    let target = u32::from(state.placed);
    let bits = (state.opacity * 127.0).floor() as u32;
    let byte = (bits << 1) | target;
    byte << 24 | byte << 16 | byte << 8 | byte
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_starts_hidden_unless_skipping_fade() {
        assert_eq!(OpacityState::new(None, 0.5, true, false).opacity, 0.0);
        assert_eq!(OpacityState::new(None, 0.5, true, true).opacity, 1.0);
        assert_eq!(OpacityState::new(None, 0.5, false, true).opacity, 0.0);
    }

    #[test]
    fn step_follows_previous_target_and_clamps() {
        let up = OpacityState {
            opacity: 0.8,
            placed: true,
        };
        let next = OpacityState::new(Some(&up), 0.5, false, false);
        assert_eq!(next.opacity, 1.0);
        assert!(!next.placed);

        let down = OpacityState::new(Some(&next), 0.3, false, false);
        assert!((down.opacity - 0.7).abs() < 1e-6);

        let gone = OpacityState::new(Some(&down), 5.0, false, false);
        assert_eq!(gone.opacity, 0.0);
        assert!(gone.is_hidden());
    }

    #[test]
    fn converges_at_fixed_increment() {
        let mut state = OpacityState::new(None, 0.25, true, false);
        for _ in 0..10 {
            state = OpacityState::new(Some(&state), 0.25, true, false);
        }
        assert_eq!(state.opacity, 1.0);
        for _ in 0..10 {
            state = OpacityState::new(Some(&state), 0.25, false, false);
        }
        assert_eq!(state.opacity, 0.0);
        assert!(state.is_hidden());
    }

    #[test]
    fn hidden_requires_zero_and_unplaced() {
        assert!(!OpacityState {
            opacity: 0.0,
            placed: true
        }
        .is_hidden());
        assert!(!OpacityState {
            opacity: 0.1,
            placed: false
        }
        .is_hidden());
    }

    #[test]
    fn joint_hidden_requires_both() {
        let joint = JointOpacityState::new(None, 1.0, false, true, true);
        assert!(joint.text.is_hidden());
        assert!(!joint.is_hidden());
        assert!(JointOpacityState::new(None, 1.0, false, false, true).is_hidden());
    }

    #[test]
    fn pack_special_cases() {
        assert_eq!(
            pack_opacity(&OpacityState {
                opacity: 0.0,
                placed: false
            }),
            0
        );
        assert_eq!(
            pack_opacity(&OpacityState {
                opacity: 1.0,
                placed: true
            }),
            4_294_967_295
        );
    }

    #[test]
    fn pack_repeats_byte_per_corner() {
        let packed = pack_opacity(&OpacityState {
            opacity: 0.5,
            placed: true,
        });
        // floor(0.5 * 127) = 63 -> (63 << 1) | 1 = 127
        assert_eq!(packed, 0x7F7F_7F7F);
        let faded = pack_opacity(&OpacityState {
            opacity: 1.0,
            placed: false,
        });
        assert_eq!(faded, 0xFEFE_FEFE);
    }
}
