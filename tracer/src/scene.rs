//! Demo scene: every worker runs the shading kernel's logical program on its
//! own lane machine over one horizontal band of the frame.

use std::f64::consts::TAU;

use parking_lot::Mutex;
use simd_assembler::inst::Inst;
use simd_assembler::{Breg, ElementWidth, LaneMachine, Target};
use tracer_pool::{FrameBuffer, Region, Scene, SliceError};

/// Pixel written where the ray misses.
pub const BACKGROUND: u32 = 0x0020_2030;

/// Background marker in the kernel's integer lanes.
const MISS: i64 = -1;

struct Worker {
    machine: LaneMachine,
    input: u64,
    output: u64,
    center: f64,
}

/// Sphere scene rendered through the lane model.
pub struct SphereScene<R: Region> {
    program: Vec<Inst>,
    elem: ElementWidth,
    lanes: usize,
    x_res: usize,
    y_res: usize,
    slices: usize,
    workers: Vec<Mutex<Worker>>,
    frame: Mutex<FrameBuffer<R>>,
}

fn encode(elem: ElementWidth, values: impl Iterator<Item = f64>) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        match elem {
            ElementWidth::W32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
            ElementWidth::W64 => out.extend_from_slice(&v.to_le_bytes()),
        }
    }
    out
}

fn encode_int(elem: ElementWidth, value: i64, lanes: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for _ in 0..lanes {
        match elem {
            ElementWidth::W32 => out.extend_from_slice(&(value as i32).to_le_bytes()),
            ElementWidth::W64 => out.extend_from_slice(&value.to_le_bytes()),
        }
    }
    out
}

fn decode_int(elem: ElementWidth, bytes: &[u8]) -> Vec<i64> {
    match elem {
        ElementWidth::W32 => bytes
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64)
            .collect(),
        ElementWidth::W64 => bytes
            .chunks_exact(8)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect(),
    }
}

fn pixel(value: i64) -> u32 {
    if value == MISS {
        return BACKGROUND;
    }
    let v = value.clamp(0, 255) as u32;
    v << 16 | v << 8 | v
}

impl<R: Region> SphereScene<R> {
    /// Scene over `frame` split into `slices` bands, one lane machine each.
    pub fn new<T: Target>(program: Vec<Inst>, frame: FrameBuffer<R>, slices: usize) -> Self {
        let lanes = T::LANES as usize;
        let elem = T::ELEMENT;
        let workers = (0..slices)
            .map(|_| {
                let mut machine = LaneMachine::new::<T>();
                let input = machine.reserve(2 * T::VECTOR_BYTES as usize);
                let scale = machine.place(&encode(elem, std::iter::repeat(255.0).take(lanes)));
                let background = machine.place(&encode_int(elem, MISS, lanes));
                let output = machine.reserve(T::VECTOR_BYTES as usize);
                machine.set_base(Breg::Reax, input);
                machine.set_base(Breg::Resi, scale);
                machine.set_base(Breg::Redi, background);
                machine.set_base(Breg::Recx, output);
                Mutex::new(Worker {
                    machine,
                    input,
                    output,
                    center: 0.0,
                })
            })
            .collect();

        Self {
            program,
            elem,
            lanes,
            x_res: frame.x_res(),
            y_res: frame.y_res(),
            slices,
            workers,
            frame: Mutex::new(frame),
        }
    }

    /// Digest of the visible frame area.
    pub fn frame_digest(&self) -> blake3::Hash {
        let pixels = self.frame.lock().packed();
        let mut hasher = blake3::Hasher::new();
        for px in pixels {
            hasher.update(&px.to_le_bytes());
        }
        hasher.finalize()
    }

    fn worker(&self, index: usize) -> Result<&Mutex<Worker>, SliceError> {
        self.workers
            .get(index)
            .ok_or_else(|| SliceError(format!("no band for worker {index}")))
    }

    fn shade_row(&self, worker: &mut Worker, y: usize) -> Result<Vec<u32>, SliceError> {
        let radius = self.x_res.min(self.y_res) as f64 * 0.4;
        let (cx, cy) = (self.x_res as f64 / 2.0 + worker.center * radius, self.y_res as f64 / 2.0);
        let v = (y as f64 + 0.5 - cy) / radius;
        let mut row = vec![BACKGROUND; self.x_res];

        for x0 in (0..self.x_res).step_by(self.lanes) {
            let xs = (0..self.lanes).map(|i| ((x0 + i) as f64 + 0.5 - cx) / radius);
            let ys = std::iter::repeat(v).take(self.lanes);
            let input = encode(self.elem, xs.chain(ys));
            let lane_err = |err: simd_assembler::LaneError| SliceError(err.to_string());

            worker.machine.write(worker.input, &input).map_err(lane_err)?;
            worker.machine.run(&self.program).map_err(lane_err)?;
            let bytes = worker
                .machine
                .read(worker.output, self.lanes * self.elem.bytes() as usize)
                .map_err(lane_err)?;
            for (dst, value) in row[x0..].iter_mut().zip(decode_int(self.elem, bytes)) {
                *dst = pixel(value);
            }
        }
        Ok(row)
    }
}

impl<R: Region> Scene for SphereScene<R> {
    fn update_slice(&self, index: usize, phase: u8) -> Result<(), SliceError> {
        let mut worker = self.worker(index)?.lock();
        worker.center = (phase as f64 / 256.0 * TAU).sin() * 0.5;
        Ok(())
    }

    fn render_slice(&self, index: usize, _phase: u8) -> Result<(), SliceError> {
        let mut worker = self.worker(index)?.lock();
        let band = self.frame.lock().band(index, self.slices);
        for y in band {
            let row = self.shade_row(&mut worker, y)?;
            self.frame.lock().write_row(y, &row);
        }
        Ok(())
    }
}
