use super::{Indicator, Window};

#[derive(Debug, Clone)]
pub struct VolumeProfile {
    volumes: Window,
    avg_volume: Option<f64>,
}

impl VolumeProfile {
    pub fn new(period: usize) -> Self {
        Self {
            volumes: Window::new(period),
            avg_volume: None,
        }
    }

    pub fn update(&mut self, volume: f64) -> Option<f64> {
        self.volumes.push(volume);
        self.avg_volume = self.volumes.mean();
        self.avg_volume
    }

    pub fn relative_volume(&self, current_volume: f64) -> Option<f64> {
        self.avg_volume.map(|avg| {
            if avg == 0.0 {
                1.0
            } else {
                current_volume / avg
            }
        })
    }
}

impl Indicator for VolumeProfile {
    fn name(&self) -> &'static str {
        "VolumeProfile"
    }

    fn is_ready(&self) -> bool {
        self.avg_volume.is_some()
    }

    fn reset(&mut self) {
        self.volumes.clear();
        self.avg_volume = None;
    }
}
