//! Input-shaping policies applied before a raw sample becomes canonical.
//!
//! Shaping runs on the local player's raw bitmask only; the shaped result is
//! what gets time-stamped, sent to the peer and fed to the simulation. Every
//! policy here is a pure function of the press/release event history, so two
//! hosts replaying the same event order shape identically.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::Button;

/// How simultaneously held opposing cardinal directions resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SocdPolicy {
    /// Opposing directions cancel to neutral.
    #[default]
    Neutral,
    /// The most recently pressed direction overrides the older one.
    LastWins,
}

/// Shaping configuration. Hot-swappable; read at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapingConfig {
    pub socd: SocdPolicy,
    /// Window during which an attack-button release still registers as a
    /// press on the release frame. 0 disables negative edge.
    pub negative_edge_ms: u32,
    /// Frame tolerance for matching multi-input motion sequences. Stored
    /// here and consumed by the combat simulation; the core only carries it.
    pub motion_leniency_frames: u8,
}

impl Default for ShapingConfig {
    fn default() -> Self {
        Self {
            socd: SocdPolicy::Neutral,
            negative_edge_ms: 0,
            motion_leniency_frames: 3,
        }
    }
}

/// Stateful shaper: tracks press ordering for SOCD `LastWins` and the
/// negative-edge timers armed on attack-button presses.
#[derive(Debug, Default)]
pub struct InputShaper {
    prev_bits: u16,
    /// Monotonic press counter; assigns an order to every direction press.
    press_seq: u32,
    /// Press-order stamp per direction bit (0 = not held).
    direction_order: [u32; 4],
    /// Press time per attack button, armed on press, consumed on release.
    attack_armed: [Option<Instant>; 4],
}

impl InputShaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shape one raw sample. Must be called exactly once per captured frame.
    pub fn shape(&mut self, raw: u16, now: Instant, config: &ShapingConfig) -> u16 {
        self.track_direction_presses(raw);
        let mut bits = self.apply_socd(raw, config.socd);
        bits = self.apply_negative_edge(raw, bits, now, config.negative_edge_ms);
        self.prev_bits = raw;
        bits
    }

    /// Drop all held state (session teardown or device change).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn track_direction_presses(&mut self, raw: u16) {
        let directions = [Button::Up, Button::Down, Button::Left, Button::Right];
        for (i, dir) in directions.into_iter().enumerate() {
            let held = raw & dir.bit() != 0;
            let was_held = self.prev_bits & dir.bit() != 0;
            if held && !was_held {
                self.press_seq += 1;
                self.direction_order[i] = self.press_seq;
            } else if !held {
                self.direction_order[i] = 0;
            }
        }
    }

    fn apply_socd(&self, raw: u16, policy: SocdPolicy) -> u16 {
        let mut bits = raw;
        for (a, b) in Button::OPPOSING_PAIRS {
            let both = bits & a.bit() != 0 && bits & b.bit() != 0;
            if !both {
                continue;
            }
            match policy {
                SocdPolicy::Neutral => {
                    bits &= !(a.bit() | b.bit());
                }
                SocdPolicy::LastWins => {
                    let older = if self.order_of(a) < self.order_of(b) {
                        a
                    } else {
                        b
                    };
                    bits &= !older.bit();
                }
            }
        }
        bits
    }

    fn order_of(&self, dir: Button) -> u32 {
        let directions = [Button::Up, Button::Down, Button::Left, Button::Right];
        directions
            .iter()
            .position(|d| *d == dir)
            .map(|i| self.direction_order[i])
            .unwrap_or(0)
    }

    fn apply_negative_edge(&mut self, raw: u16, mut bits: u16, now: Instant, window_ms: u32) -> u16 {
        for (i, button) in Button::ATTACKS.into_iter().enumerate() {
            let held = raw & button.bit() != 0;
            let was_held = self.prev_bits & button.bit() != 0;
            if held && !was_held {
                self.attack_armed[i] = Some(now);
            } else if !held && was_held {
                if let Some(pressed_at) = self.attack_armed[i].take()
                    && window_ms > 0
                    && now.saturating_duration_since(pressed_at).as_millis() <= window_ms as u128
                {
                    // Release within the window re-asserts the button for
                    // this frame, so release-on-completion motions land.
                    bits |= button.bit();
                }
            }
        }
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn shape_sequence(shaper: &mut InputShaper, config: &ShapingConfig, raws: &[u16]) -> Vec<u16> {
        let start = Instant::now();
        raws.iter()
            .enumerate()
            .map(|(i, raw)| shaper.shape(*raw, start + Duration::from_millis(16 * i as u64), config))
            .collect()
    }

    #[test]
    fn socd_neutral_cancels_opposing_directions() {
        let mut shaper = InputShaper::new();
        let config = ShapingConfig::default();
        let lr = Button::Left.bit() | Button::Right.bit();
        let out = shape_sequence(&mut shaper, &config, &[Button::Left.bit(), lr, lr]);
        assert_eq!(out, vec![Button::Left.bit(), 0, 0]);
    }

    #[test]
    fn socd_last_wins_keeps_newest_press() {
        let mut shaper = InputShaper::new();
        let config = ShapingConfig {
            socd: SocdPolicy::LastWins,
            ..Default::default()
        };
        let lr = Button::Left.bit() | Button::Right.bit();
        // Left held first, then Right pressed on top: Right wins while both
        // are down, and Left re-emerges once Right releases.
        let out = shape_sequence(
            &mut shaper,
            &config,
            &[Button::Left.bit(), lr, lr, Button::Left.bit()],
        );
        assert_eq!(
            out,
            vec![
                Button::Left.bit(),
                Button::Right.bit(),
                Button::Right.bit(),
                Button::Left.bit()
            ]
        );
    }

    #[test]
    fn socd_policies_agree_except_while_opposing_held() {
        let mut neutral = InputShaper::new();
        let mut last_wins = InputShaper::new();
        let neutral_cfg = ShapingConfig::default();
        let last_cfg = ShapingConfig {
            socd: SocdPolicy::LastWins,
            ..Default::default()
        };

        let lr = Button::Left.bit() | Button::Right.bit();
        let sequence = [
            0,
            Button::Right.bit(),
            lr,
            lr,
            Button::Left.bit(),
            0,
            Button::Up.bit(),
        ];
        let a = shape_sequence(&mut neutral, &neutral_cfg, &sequence);
        let b = shape_sequence(&mut last_wins, &last_cfg, &sequence);

        for (i, raw) in sequence.iter().enumerate() {
            let opposing_held = raw & lr == lr;
            if opposing_held {
                assert_ne!(a[i], b[i], "policies must differ at frame {i}");
            } else {
                assert_eq!(a[i], b[i], "policies must agree at frame {i}");
            }
        }
    }

    #[test]
    fn socd_is_deterministic_per_policy() {
        let lr = Button::Left.bit() | Button::Right.bit();
        let sequence = [Button::Left.bit(), lr, Button::Right.bit(), lr, 0];
        for config in [
            ShapingConfig::default(),
            ShapingConfig {
                socd: SocdPolicy::LastWins,
                ..Default::default()
            },
        ] {
            let first = shape_sequence(&mut InputShaper::new(), &config, &sequence);
            let second = shape_sequence(&mut InputShaper::new(), &config, &sequence);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn negative_edge_reasserts_release_within_window() {
        let mut shaper = InputShaper::new();
        let config = ShapingConfig {
            negative_edge_ms: 100,
            ..Default::default()
        };
        let start = Instant::now();
        let lp = Button::LightPunch.bit();

        assert_eq!(shaper.shape(lp, start, &config), lp);
        // Release 50ms after press: still inside the window, bit re-asserted.
        assert_eq!(shaper.shape(0, start + Duration::from_millis(50), &config), lp);
        // The frame after the release is clean.
        assert_eq!(shaper.shape(0, start + Duration::from_millis(66), &config), 0);
    }

    #[test]
    fn negative_edge_expires_outside_window() {
        let mut shaper = InputShaper::new();
        let config = ShapingConfig {
            negative_edge_ms: 100,
            ..Default::default()
        };
        let start = Instant::now();
        let lp = Button::LightPunch.bit();

        shaper.shape(lp, start, &config);
        assert_eq!(shaper.shape(0, start + Duration::from_millis(250), &config), 0);
    }

    #[test]
    fn negative_edge_disabled_by_zero_window() {
        let mut shaper = InputShaper::new();
        let config = ShapingConfig::default();
        let start = Instant::now();

        shaper.shape(Button::HeavyKick.bit(), start, &config);
        assert_eq!(shaper.shape(0, start + Duration::from_millis(1), &config), 0);
    }
}
