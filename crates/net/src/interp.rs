use glam::{Quat, Vec3};

/// Blend between two samples.
pub trait Interpolate: Copy {
    fn interpolate(from: Self, to: Self, alpha: f32) -> Self;
}

impl Interpolate for Vec3 {
    fn interpolate(from: Self, to: Self, alpha: f32) -> Self {
        from.lerp(to, alpha)
    }
}

impl Interpolate for Quat {
    fn interpolate(from: Self, to: Self, alpha: f32) -> Self {
        from.slerp(to, alpha)
    }
}

/// Smooths a low-rate stream of samples into per-frame values.
///
/// Each push blends from the previous sample to the new one over `rate`
/// seconds, the expected time between samples. A sample carrying a different
/// snap token is applied immediately with no blend.
#[derive(Debug, Clone, PartialEq)]
pub struct StateInterpolator<T> {
    previous: T,
    current: T,
    value: T,
    elapsed: f32,
    rate: f32,
    snap_token: Option<u64>,
}

impl<T: Interpolate> StateInterpolator<T> {
    pub fn new(initial: T, rate: f32) -> Self {
        Self {
            previous: initial,
            current: initial,
            value: initial,
            elapsed: 0.0,
            rate,
            snap_token: None,
        }
    }

    pub fn push(&mut self, sample: T, snap_token: Option<u64>) {
        if snap_token != self.snap_token {
            self.snap_token = snap_token;
            self.previous = sample;
            self.current = sample;
            self.value = sample;
        } else {
            self.previous = self.current;
            self.current = sample;
        }
        self.elapsed = 0.0;
    }

    /// Advance by `dt` seconds and return the blended value.
    pub fn update(&mut self, dt: f32) -> T {
        self.elapsed += dt;
        let alpha = if self.rate > 0.0 {
            (self.elapsed / self.rate).clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.value = T::interpolate(self.previous, self.current, alpha);
        self.value
    }

    /// Jump to the latest sample.
    pub fn snap(&mut self) {
        self.previous = self.current;
        self.value = self.current;
    }

    pub fn value(&self) -> T {
        self.value
    }

    /// Latest raw sample.
    pub fn target(&self) -> T {
        self.current
    }

    pub fn snap_token(&self) -> Option<u64> {
        self.snap_token
    }
}
