// Counter-based random stream shared with emit.wgsl. Both sides must produce
// identical bits for a given (seed, index, lane).

pub const RECYCLE_LANE: u32 = 0xffff_ffff;

pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747796405).wrapping_add(2891336453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277803737);
    (word >> 22) ^ word
}

#[derive(Debug, Clone, Copy)]
pub struct ParticleRng {
    state: u32,
}

impl ParticleRng {
    pub fn stream(seed: u32, index: u32, lane: u32) -> Self {
        ParticleRng {
            state: pcg_hash(seed ^ pcg_hash(index ^ pcg_hash(lane))),
        }
    }

    // Uniform in [0, 1) with 24 bits of precision.
    pub fn next_unit(&mut self) -> f32 {
        self.state = pcg_hash(self.state);
        (self.state >> 8) as f32 / 16_777_216.0
    }

    pub fn next_range(&mut self, lo: f32, hi: f32) -> f32 {
        lo + (hi - lo) * self.next_unit()
    }

    pub fn unit_direction(&mut self) -> [f32; 3] {
        let z = self.next_range(-1.0, 1.0);
        let phi = self.next_unit() * std::f32::consts::TAU;
        let r = (1.0 - z * z).max(0.0).sqrt();
        [r * phi.cos(), r * phi.sin(), z]
    }
}
