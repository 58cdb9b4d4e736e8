//! Shader IR → code generator translation.
//!
//! Registers are structure-of-arrays quads: one `Float4` per vector
//! component, lanes running across the four pixels of a quad (or four
//! vertices of a batch). All numeric values are floats — ES ints are
//! whole-valued floats and booleans are 0.0/1.0 — so one translation serves
//! every opcode; integer-only operations round-trip through `Int4`.
//!
//! Divergent control flow is predicated: `If`/`Else` intersect an execution
//! mask, restricted loops either expand (`unroll`) or run as counted loops,
//! `Break`/`Continue`/`Ret` subtract lanes through per-frame masks, and
//! `Discard` accumulates a kill mask that the pixel routine folds into
//! coverage.

use crate::data::{DrawData, SamplerData, MAX_SAMPLERS};
use rustc_hash::FxHashMap;
use shale_core::ir::{Bank, Instruction, Opcode, Reg, ShaderIr, Src};
use shale_jit::dsl::*;
use std::mem::offset_of;

/// One shader register: four components, each holding four lanes.
pub struct Quad {
    pub c: [Var<Float4>; 4],
}

impl Quad {
    pub fn new() -> Quad {
        Quad {
            c: [Var::new(), Var::new(), Var::new(), Var::new()],
        }
    }

    pub fn zeroed() -> Quad {
        let q = Quad::new();
        for c in &q.c {
            c.set(Float4::from(0.0));
        }
        q
    }
}

struct IfFrame {
    saved: Var<Int4>,
    cond: Var<Int4>,
}

struct LoopFrame {
    break_mask: Var<Int4>,
    saved: Var<Int4>,
}

pub struct ShaderCore<'a> {
    ir: &'a ShaderIr,
    pub temps: Vec<Quad>,
    pub inputs: Vec<Quad>,
    pub outputs: Vec<Quad>,

    data: Pointer<Byte>,
    uniform_base: i32,

    exec: Var<Int4>,
    ret_mask: Var<Int4>,
    pub kill_mask: Var<Int4>,
    if_stack: Vec<IfFrame>,
    loop_stack: Vec<LoopFrame>,
    if_depth: usize,
    divergent_loops: usize,
    saw_ret: bool,

    /// Known loop-index values while expanding unrolled loops, keyed by the
    /// index register.
    index_values: FxHashMap<u32, i32>,
}

impl<'a> ShaderCore<'a> {
    pub fn new(
        ir: &'a ShaderIr,
        data: Pointer<Byte>,
        uniform_base: i32,
        input_count: usize,
        output_count: usize,
    ) -> ShaderCore<'a> {
        let temps = (0..ir.temp_count.max(1)).map(|_| Quad::zeroed()).collect();
        let inputs = (0..input_count).map(|_| Quad::zeroed()).collect();
        let outputs = (0..output_count).map(|_| Quad::zeroed()).collect();

        let core = ShaderCore {
            ir,
            temps,
            inputs,
            outputs,
            data,
            uniform_base,
            exec: Var::new(),
            ret_mask: Var::new(),
            kill_mask: Var::new(),
            if_stack: Vec::new(),
            loop_stack: Vec::new(),
            if_depth: 0,
            divergent_loops: 0,
            saw_ret: false,
            index_values: FxHashMap::default(),
        };
        core.exec.set(Int4::from(-1));
        core.ret_mask.set(Int4::from(-1));
        core.kill_mask.set(Int4::from(0));
        core
    }

    /// Start with a partial execution mask (pixel coverage).
    pub fn set_exec(&mut self, mask: Int4) {
        self.exec.set(mask);
    }

    pub fn run(&mut self) {
        self.translate_range(0, self.ir.instructions.len());
    }

    fn translate_range(&mut self, start: usize, end: usize) {
        let mut pc = start;
        while pc < end {
            pc = self.translate(pc);
        }
    }

    /// Index of the instruction closing the structure opened at `pc`, and
    /// the position of its `Else` if any.
    fn find_close(&self, pc: usize) -> (usize, Option<usize>) {
        let label = self.ir.instructions[pc].label;
        let open = self.ir.instructions[pc].op;
        let (else_op, end_op) = match open {
            Opcode::If => (Some(Opcode::Else), Opcode::EndIf),
            _ => (None, Opcode::EndLoop),
        };

        let mut else_at = None;
        for (i, inst) in self.ir.instructions.iter().enumerate().skip(pc + 1) {
            if inst.label != label {
                continue;
            }
            if Some(inst.op) == else_op {
                else_at = Some(i);
            }
            if inst.op == end_op {
                return (i, else_at);
            }
        }
        (self.ir.instructions.len(), else_at)
    }

    fn range_diverges(&self, start: usize, end: usize) -> bool {
        self.ir.instructions[start..end]
            .iter()
            .any(|i| matches!(i.op, Opcode::Break | Opcode::Continue | Opcode::Ret))
    }

    fn masked(&self) -> bool {
        self.if_depth > 0 || self.divergent_loops > 0 || self.saw_ret
    }

    /// Reapply the loop and return masks to a restored execution set.
    fn apply_masks(&self, base: Int4) -> Int4 {
        let mut m = base & self.ret_mask.get();
        for frame in &self.loop_stack {
            m = m & frame.break_mask.get();
        }
        m
    }

    fn translate(&mut self, pc: usize) -> usize {
        let inst = self.ir.instructions[pc].clone();

        match inst.op {
            Opcode::If => {
                let cond = self.cond_mask(&inst);
                let frame = IfFrame {
                    saved: Var::init(self.exec.get()),
                    cond: Var::init(cond),
                };
                self.exec.set(self.exec.get() & cond);
                self.if_stack.push(frame);
                self.if_depth += 1;
                pc + 1
            }
            Opcode::Else => {
                let frame = self.if_stack.last().expect("unbalanced else");
                let restored = frame.saved.get() & !frame.cond.get();
                let restored = self.apply_masks(restored);
                self.exec.set(restored);
                pc + 1
            }
            Opcode::EndIf => {
                let frame = self.if_stack.pop().expect("unbalanced endif");
                self.if_depth -= 1;
                let restored = self.apply_masks(frame.saved.get());
                self.exec.set(restored);
                pc + 1
            }
            Opcode::Loop => {
                let (end, _) = self.find_close(pc);
                self.translate_loop(pc, end, &inst);
                end + 1
            }
            Opcode::EndLoop => pc + 1, // handled by translate_loop
            Opcode::Break => {
                let frame = self.loop_stack.last().expect("break outside loop");
                frame.break_mask.set(frame.break_mask.get() & !self.exec.get());
                self.exec.set(self.exec.get() & frame.break_mask.get());
                pc + 1
            }
            Opcode::Continue => {
                // Lanes drop out for the rest of the iteration; the next
                // iteration's restore brings them back.
                self.exec.set(Int4::from(0) & self.exec.get());
                pc + 1
            }
            Opcode::Ret => {
                self.ret_mask.set(self.ret_mask.get() & !self.exec.get());
                self.exec.set(self.exec.get() & self.ret_mask.get());
                self.saw_ret = true;
                pc + 1
            }
            Opcode::Discard => {
                self.kill_mask.set(self.kill_mask.get() | self.exec.get());
                pc + 1
            }
            Opcode::Nop => pc + 1,
            _ => {
                self.translate_alu(&inst);
                pc + 1
            }
        }
    }

    fn translate_loop(&mut self, pc: usize, end: usize, inst: &Instruction) {
        let info = inst.loop_info.expect("loop without bounds");
        let body = (pc + 1, end);
        let diverges = self.range_diverges(body.0, body.1);

        let frame = LoopFrame {
            break_mask: Var::init(Int4::from(-1)),
            saved: Var::init(self.exec.get()),
        };
        self.loop_stack.push(frame);
        if diverges {
            self.divergent_loops += 1;
        }

        if inst.unroll {
            // Expand: the index register takes each value as a constant, so
            // relative operands resolve statically.
            let float = info.float;
            let mut value = info.init;
            for _ in 0..info.iterations {
                self.index_values.insert(
                    info.index.index,
                    if float {
                        f32::from_bits(value) as i32
                    } else {
                        value as i32
                    },
                );
                // The index is also readable as an ordinary register.
                let as_float = if float {
                    f32::from_bits(value)
                } else {
                    value as i32 as f32
                };
                for c in 0..4 {
                    self.temps[info.index.index as usize].c[c].set(Float4::from(as_float));
                }

                let frame = self.loop_stack.last().unwrap();
                let restored = frame.saved.get() & frame.break_mask.get() & self.ret_mask.get();
                self.exec.set(restored);

                self.translate_range(body.0, body.1);

                value = if float {
                    (f32::from_bits(value) + f32::from_bits(info.step)).to_bits()
                } else {
                    (value as i32).wrapping_add(info.step as i32) as u32
                };
            }
            self.index_values.remove(&info.index.index);
        } else {
            // Counted runtime loop; the trip count is uniform.
            let index_reg = info.index.index as usize;
            let init = f32::from_bits(info.init);
            let step = f32::from_bits(info.step);
            for c in 0..4 {
                self.temps[index_reg].c[c].set(Float4::from(init));
            }

            let counter = Var::<Int>::init(Int::from(0));
            let iterations = info.iterations as i32;

            // The body is emitted once inside the loop; captured state lives
            // in Vars, which the builder spills across the blocks.
            let this = self as *mut Self;
            while_loop(
                || counter.get().lt(Int::from(iterations)),
                || {
                    // SAFETY: `while_loop` invokes the closure synchronously
                    // on this thread before returning.
                    let core = unsafe { &mut *this };
                    let frame = core.loop_stack.last().unwrap();
                    let restored =
                        frame.saved.get() & frame.break_mask.get() & core.ret_mask.get();
                    core.exec.set(restored);

                    core.translate_range(body.0, body.1);

                    let idx = &core.temps[index_reg];
                    for c in 0..4 {
                        idx.c[c].set(idx.c[c].get() + Float4::from(step));
                    }
                    counter.set(counter.get() + Int::from(1));
                },
            );
        }

        if diverges {
            self.divergent_loops -= 1;
        }
        let frame = self.loop_stack.pop().unwrap();
        let restored = self.apply_masks(frame.saved.get());
        self.exec.set(restored);
    }

    // ── operand access ───────────────────────────────────────────────

    fn resolve_index(&self, reg: Reg, rel: Option<Reg>) -> u32 {
        let offset = rel
            .and_then(|r| self.index_values.get(&r.index))
            .copied()
            .unwrap_or(0);
        (reg.index as i64 + offset as i64).max(0) as u32
    }

    /// Component `comp` of a source operand, after the swizzle.
    fn src(&mut self, src: &Src, comp: usize) -> Float4 {
        let lane = src.swizzle.lane(comp);
        let index = self.resolve_index(src.reg, src.rel) as usize;

        match src.reg.bank {
            Bank::Temp | Bank::Address => self.temps[index.min(self.temps.len() - 1)].c[lane].get(),
            Bank::Input => self.inputs[index.min(self.inputs.len().max(1) - 1)].c[lane].get(),
            Bank::Output => self.outputs[index.min(self.outputs.len().max(1) - 1)].c[lane].get(),
            Bank::Constant => {
                let bits = self.ir.constants[index][lane];
                Float4::from(f32::from_bits(bits))
            }
            Bank::Uniform => {
                let off = self.uniform_base + index as i32 * 16 + lane as i32 * 4;
                let v = self.data.offset_const(off).cast::<Float>().load();
                Float4::splat(v)
            }
            Bank::Sampler => Float4::from(0.0),
        }
    }

    fn dst_write(&mut self, inst: &Instruction, values: [Option<Float4>; 4]) {
        let Some(dst) = inst.dst else { return };
        let index = self.resolve_index(dst.reg, dst.rel) as usize;
        let masked = self.masked();
        let exec = if masked { Some(self.exec.get()) } else { None };

        for (comp, value) in values.into_iter().enumerate() {
            if dst.mask & (1 << comp) == 0 {
                continue;
            }
            let Some(value) = value else { continue };

            let slot = match dst.reg.bank {
                Bank::Temp | Bank::Address => &self.temps[index.min(self.temps.len() - 1)].c[comp],
                Bank::Input => &self.inputs[index.min(self.inputs.len().max(1) - 1)].c[comp],
                Bank::Output => &self.outputs[index.min(self.outputs.len().max(1) - 1)].c[comp],
                _ => continue,
            };

            match &exec {
                Some(mask) => {
                    let old = slot.get();
                    slot.set(mask.select_lanes(value, old));
                }
                None => slot.set(value),
            }
        }
    }

    /// Scalar condition → lane mask (nonzero means true).
    fn cond_mask(&mut self, inst: &Instruction) -> Int4 {
        let src = inst.src[0].expect("condition operand");
        let v = self.src(&src, 0);
        v.ne_(Float4::from(0.0))
    }

    // ── ALU ──────────────────────────────────────────────────────────

    fn translate_alu(&mut self, inst: &Instruction) {
        use Opcode::*;

        let mask = inst.dst.map(|d| d.mask).unwrap_or(0xf);

        // Horizontal operations produce one value for all masked lanes.
        match inst.op {
            Dp2 | Dp3 | Dp4 | Length | Distance | Normalize | Cross | Reflect => {
                self.translate_vector_op(inst);
                return;
            }
            TexSample | TexSampleLod => {
                self.translate_sample(inst);
                return;
            }
            _ => {}
        }

        let mut out: [Option<Float4>; 4] = [None, None, None, None];
        for comp in 0..4 {
            if mask & (1 << comp) == 0 {
                continue;
            }

            let a = inst.src[0].map(|s| self.src(&s, comp));
            let b = inst.src[1].map(|s| self.src(&s, comp));
            let c = inst.src[2].map(|s| self.src(&s, comp));

            let a = a.unwrap_or(Float4::from(0.0));

            let v: Float4 = match inst.op {
                Mov => a,
                Neg => -a,
                Abs => abs(a),
                Sign => {
                    let zero = Float4::from(0.0);
                    let pos = a.gt(zero);
                    let neg = a.lt(zero);
                    pos.select_lanes(
                        Float4::from(1.0),
                        neg.select_lanes(Float4::from(-1.0), zero),
                    )
                }
                Floor => floor(a),
                Ceil => ceil(a),
                Fract => a - floor(a),
                Trunc => trunc(a),
                Round => round(a),
                Rcp => rcp(a),
                Rsq => rcp_sqrt(a),
                Sqrt => sqrt(a),
                Exp2 => exp2(a),
                Log2 => log2(a),
                Exp => exp(a),
                Log => log(a),
                Sin => sin(a),
                Cos => cos(a),
                Tan => tan(a),
                Asin => asin(a),
                Acos => acos(a),
                Atan => atan(a),

                Add => a + b.unwrap(),
                Sub => a - b.unwrap(),
                Mul => a * b.unwrap(),
                Div => a / b.unwrap(),
                Mod => {
                    let b = b.unwrap();
                    a - b * floor(a / b)
                }
                Min => min(a, b.unwrap()),
                Max => max(a, b.unwrap()),
                Pow => pow(a, b.unwrap()),
                Atan2 => atan2(a, b.unwrap()),
                Step => {
                    // edge in src0, value in src1
                    let x = b.unwrap();
                    x.ge(a).select_lanes(Float4::from(1.0), Float4::from(0.0))
                }

                Mad => mul_add(a, b.unwrap(), c.unwrap()),
                Mix => {
                    let (b, t) = (b.unwrap(), c.unwrap());
                    a + (b - a) * t
                }
                Clamp => min(max(a, b.unwrap()), c.unwrap()),
                SmoothStep => {
                    // edges in src0/src1, value in src2
                    let (e1, x) = (b.unwrap(), c.unwrap());
                    let t = min(
                        max((x - a) / (e1 - a), Float4::from(0.0)),
                        Float4::from(1.0),
                    );
                    t * t * (Float4::from(3.0) - Float4::from(2.0) * t)
                }

                CmpEq => bool_mask(a.eq_(b.unwrap())),
                CmpNe => bool_mask(a.ne_(b.unwrap())),
                CmpLt => bool_mask(a.lt(b.unwrap())),
                CmpLe => bool_mask(a.le(b.unwrap())),
                CmpGt => bool_mask(a.gt(b.unwrap())),
                CmpGe => bool_mask(a.ge(b.unwrap())),

                And => int_op(a, b.unwrap(), |x, y| x & y),
                Or => int_op(a, b.unwrap(), |x, y| x | y),
                Xor => int_op(a, b.unwrap(), |x, y| x ^ y),
                Not => {
                    // Logical complement of a 0/1 value.
                    Float4::from(1.0) - min(max(a, Float4::from(0.0)), Float4::from(1.0))
                }
                Shl => int_shift(a, b.unwrap(), true),
                Shr => int_shift(a, b.unwrap(), false),

                I2F | U2F | B2F => a,
                F2I | F2U => trunc(a),
                F2B => bool_mask(a.ne_(Float4::from(0.0))),

                Select => {
                    let cond = a.gt(Float4::from(0.5));
                    cond.select_lanes(b.unwrap(), c.unwrap())
                }

                TexSize => {
                    // Width/height of the sampler named by src0 as floats.
                    let unit = self.resolve_index(inst.src[0].unwrap().reg, inst.src[0].unwrap().rel);
                    let field = if comp == 0 {
                        offset_of!(SamplerData, width)
                    } else {
                        offset_of!(SamplerData, height)
                    };
                    let off = sampler_offset(unit) + field as i32;
                    let size = self.data.offset_const(off).cast::<Int>().load();
                    Float4::splat(Float::from(size))
                }

                _ => a,
            };

            out[comp] = Some(v);
        }

        self.dst_write(inst, out);
    }

    fn translate_vector_op(&mut self, inst: &Instruction) {
        use Opcode::*;

        let s0 = inst.src[0].unwrap();
        let a: Vec<Float4> = (0..4).map(|c| self.src(&s0, c)).collect();
        let b: Option<Vec<Float4>> = inst.src[1].map(|s| (0..4).map(|c| self.src(&s, c)).collect());

        let dot = |a: &[Float4], b: &[Float4], n: usize| -> Float4 {
            let mut sum = a[0] * b[0];
            for i in 1..n {
                sum = mul_add(a[i], b[i], sum);
            }
            sum
        };

        let mask = inst.dst.map(|d| d.mask).unwrap_or(0xf);
        let mut out: [Option<Float4>; 4] = [None, None, None, None];
        let broadcast = |out: &mut [Option<Float4>; 4], v: Float4| {
            for (comp, slot) in out.iter_mut().enumerate() {
                if mask & (1 << comp) != 0 {
                    *slot = Some(v);
                }
            }
        };

        match inst.op {
            Dp2 => broadcast(&mut out, dot(&a, b.as_ref().unwrap(), 2)),
            Dp3 => broadcast(&mut out, dot(&a, b.as_ref().unwrap(), 3)),
            Dp4 => broadcast(&mut out, dot(&a, b.as_ref().unwrap(), 4)),
            Length => broadcast(&mut out, sqrt(dot(&a, &a, 4))),
            Distance => {
                let b = b.unwrap();
                let d: Vec<Float4> = (0..4).map(|i| a[i] - b[i]).collect();
                broadcast(&mut out, sqrt(dot(&d, &d, 4)));
            }
            Normalize => {
                let inv = rcp_sqrt(dot(&a, &a, 4));
                for (comp, slot) in out.iter_mut().enumerate() {
                    if mask & (1 << comp) != 0 {
                        *slot = Some(a[comp] * inv);
                    }
                }
            }
            Cross => {
                let b = b.unwrap();
                let c = [
                    a[1] * b[2] - a[2] * b[1],
                    a[2] * b[0] - a[0] * b[2],
                    a[0] * b[1] - a[1] * b[0],
                ];
                for comp in 0..3 {
                    if mask & (1 << comp) != 0 {
                        out[comp] = Some(c[comp]);
                    }
                }
            }
            Reflect => {
                let n = b.unwrap();
                let d = dot(&a, &n, 4);
                let two_d = d + d;
                for (comp, slot) in out.iter_mut().enumerate() {
                    if mask & (1 << comp) != 0 {
                        *slot = Some(a[comp] - two_d * n[comp]);
                    }
                }
            }
            _ => {}
        }

        self.dst_write(inst, out);
    }

    // ── texture sampling ─────────────────────────────────────────────

    fn translate_sample(&mut self, inst: &Instruction) {
        let coord = inst.src[0].unwrap();
        let sampler = inst.src[1].unwrap();
        let unit = self.resolve_index(sampler.reg, sampler.rel).min(MAX_SAMPLERS as u32 - 1);

        let u = self.src(&coord, 0);
        let v = self.src(&coord, 1);

        let base = sampler_offset(unit);
        let data_ptr = self
            .data
            .offset_const(base + offset_of!(SamplerData, data) as i32)
            .cast::<Byte>();
        let width = self
            .data
            .offset_const(base + offset_of!(SamplerData, width) as i32)
            .cast::<Int>()
            .load();
        let height = self
            .data
            .offset_const(base + offset_of!(SamplerData, height) as i32)
            .cast::<Int>()
            .load();
        let filter = self
            .data
            .offset_const(base + offset_of!(SamplerData, filter) as i32)
            .cast::<Int>()
            .load();

        let wf = Float4::splat(Float::from(width));
        let hf = Float4::splat(Float::from(height));

        let result = [
            Var::<Float4>::init(Float4::from(0.0)),
            Var::<Float4>::init(Float4::from(0.0)),
            Var::<Float4>::init(Float4::from(0.0)),
            Var::<Float4>::init(Float4::from(0.0)),
        ];

        let texel = |x: Int4, y: Int4| -> [Float4; 4] {
            sample_texels(data_ptr, width, height, x, y)
        };

        if_then_else(
            filter.eq_(Int::from(1)),
            || {
                // Bilinear: four taps around the footprint center.
                let fx = u * wf - Float4::from(0.5);
                let fy = v * hf - Float4::from(0.5);
                let x0f = floor(fx);
                let y0f = floor(fy);
                let tx = fx - x0f;
                let ty = fy - y0f;
                let x0 = round_int4(x0f);
                let y0 = round_int4(y0f);
                let one = Int4::from(1);

                let t00 = texel(x0, y0);
                let t10 = texel(x0 + one, y0);
                let t01 = texel(x0, y0 + one);
                let t11 = texel(x0 + one, y0 + one);

                for c in 0..4 {
                    let top = t00[c] + (t10[c] - t00[c]) * tx;
                    let bottom = t01[c] + (t11[c] - t01[c]) * tx;
                    result[c].set(top + (bottom - top) * ty);
                }
            },
            || {
                let x = round_int4(floor(u * wf));
                let y = round_int4(floor(v * hf));
                let t = texel(x, y);
                for c in 0..4 {
                    result[c].set(t[c]);
                }
            },
        );

        let out = [
            Some(result[0].get()),
            Some(result[1].get()),
            Some(result[2].get()),
            Some(result[3].get()),
        ];
        self.dst_write(inst, out);
    }
}

fn sampler_offset(unit: u32) -> i32 {
    (offset_of!(DrawData, samplers) + unit as usize * std::mem::size_of::<SamplerData>()) as i32
}

/// Clamp-to-edge gather of one RGBA8 texel per lane, unpacked to [0,1]
/// floats in SoA order.
fn sample_texels(
    data: Pointer<Byte>,
    width: Int,
    height: Int,
    x: Int4,
    y: Int4,
) -> [Float4; 4] {
    let zero = Int4::from(0);
    let w4 = Int4::splat(width);
    let h4 = Int4::splat(height);
    let x = min(max(x, zero), w4 - Int4::from(1));
    let y = min(max(y, zero), h4 - Int4::from(1));

    let offsets = (y * w4 + x) << 2;

    let out = [
        Var::<Float4>::init(Float4::from(0.0)),
        Var::<Float4>::init(Float4::from(0.0)),
        Var::<Float4>::init(Float4::from(0.0)),
        Var::<Float4>::init(Float4::from(0.0)),
    ];

    let scale = Float::from(1.0 / 255.0);
    for lane in 0..4u8 {
        let off = offsets.lane(lane);
        let texel = data.offset(off).cast::<UInt>().load();
        for (c, slot) in out.iter().enumerate() {
            let channel = (texel >> Int::from(c as i32 * 8)) & UInt::from(0xffu32);
            let value = Float::from(channel) * scale;
            slot.set(slot.get().with_lane(lane, value));
        }
    }

    [out[0].get(), out[1].get(), out[2].get(), out[3].get()]
}

/// Comparison mask → 0.0/1.0 per lane.
fn bool_mask(mask: Int4) -> Float4 {
    mask.select_lanes(Float4::from(1.0), Float4::from(0.0))
}

/// Integer bitwise op on whole-valued floats.
fn int_op(a: Float4, b: Float4, op: impl FnOnce(Int4, Int4) -> Int4) -> Float4 {
    Float4::from(op(Int4::from(round(a)), Int4::from(round(b))))
}

fn int_shift(a: Float4, b: Float4, left: bool) -> Float4 {
    let ia = Int4::from(round(a));
    let count = Int::from(round(b).lane(0));
    Float4::from(if left { ia << count } else { ia >> count })
}
