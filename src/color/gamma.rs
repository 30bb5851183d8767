/// Nonlinear brightness correction for the audio painters.
pub struct Gamma {
    table: [u8; 256],
}

const GAMMA: f64 = 2.2;

impl Gamma {
    pub fn new() -> Gamma {
        let mut table = [0; 256];
        for (i, v) in table.iter_mut().enumerate() {
            *v = ((i as f64 / 255.0).powf(GAMMA) * 255.0).round() as u8;
        }
        Gamma { table }
    }

    /// Identity table, used when correction is switched off in the config.
    pub fn linear() -> Gamma {
        let mut table = [0; 256];
        for (i, v) in table.iter_mut().enumerate() {
            *v = i as u8;
        }
        Gamma { table }
    }

    pub fn correct(&self, level: f32) -> u8 {
        self.table[level.clamp(0.0, 255.0) as usize]
    }
}
