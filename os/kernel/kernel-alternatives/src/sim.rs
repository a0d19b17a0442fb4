//! A small A64 interpreter for patched images.
//!
//! Executes the subset of the instruction set that atomic call sites use,
//! against shared data memory, so that both the LL/SC and the LSE form of a
//! site can be exercised from many host threads. Exclusive pairs are
//! modelled with a per-hart monitor whose store succeeds through a
//! compare-and-swap on the value the load observed.

use crate::PatchError;
use crate::engine::{AltCallback, IcacheSync, PatchTarget};
use crate::insn::{
    AtomicMemory, CompareBranch, CondBranch, DataProcReg, LoadStoreExclusive, LseOp, PcRel,
    PcRelAddr, TestBranch, UncondBranch, Width,
};
use arrayvec::ArrayVec;
use core::sync::atomic::{AtomicU64, Ordering, fence};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimFault {
    #[error("undefined instruction {insn:#010x} at {pc:#x}")]
    Undefined { pc: u64, insn: u32 },
    #[error("instruction fetch outside the image at {pc:#x}")]
    TextOutOfBounds { pc: u64 },
    #[error("data access outside memory at {addr:#x}")]
    DataOutOfBounds { addr: u64 },
    #[error("misaligned data access at {addr:#x}")]
    Misaligned { addr: u64 },
    #[error("no return after {steps} steps")]
    StepLimit { steps: u64 },
}

/// Instruction memory of a simulated image.
pub struct SimText<'a> {
    base: u64,
    words: &'a mut [u32],
    callbacks: ArrayVec<(u64, AltCallback), 8>,
    icache_syncs: usize,
    last_icache_sync: Option<IcacheSync>,
}

impl<'a> SimText<'a> {
    pub fn new(base: u64, words: &'a mut [u32]) -> Self {
        Self {
            base,
            words,
            callbacks: ArrayVec::new(),
            icache_syncs: 0,
            last_icache_sync: None,
        }
    }

    /// Makes `callback` resolvable at the pseudo-address `addr`.
    ///
    /// # Errors
    /// The callback registry is full.
    pub fn register_callback(
        &mut self,
        addr: u64,
        callback: AltCallback,
    ) -> Result<(), PatchError> {
        self.callbacks
            .try_push((addr, callback))
            .map_err(|_| PatchError::UnknownCallback { addr })
    }

    #[must_use]
    pub fn words(&self) -> &[u32] {
        self.words
    }

    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    #[must_use]
    pub fn insn(&self, addr: u64) -> Option<u32> {
        self.index(addr).map(|i| self.words[i])
    }

    /// How often the engine synchronized the instruction stream.
    #[must_use]
    pub const fn icache_syncs(&self) -> usize {
        self.icache_syncs
    }

    /// The maintenance the engine asked for last.
    #[must_use]
    pub const fn last_icache_sync(&self) -> Option<IcacheSync> {
        self.last_icache_sync
    }

    fn index(&self, addr: u64) -> Option<usize> {
        let off = addr.checked_sub(self.base)?;
        if off % 4 != 0 {
            return None;
        }
        let index = usize::try_from(off / 4).ok()?;
        (index < self.words.len()).then_some(index)
    }
}

impl PatchTarget for SimText<'_> {
    fn read_insn(&self, addr: u64) -> Result<u32, PatchError> {
        self.insn(addr).ok_or(PatchError::OutOfBounds { addr })
    }

    fn write_insn(&mut self, addr: u64, insn: u32) -> Result<(), PatchError> {
        let index = self.index(addr).ok_or(PatchError::OutOfBounds { addr })?;
        self.words[index] = insn;
        Ok(())
    }

    fn clean_dcache_range(&mut self, _start: u64, _end: u64) {}

    fn sync_icache(&mut self, how: IcacheSync) {
        self.icache_syncs += 1;
        self.last_icache_sync = Some(how);
    }

    fn resolve_callback(&self, addr: u64) -> Option<AltCallback> {
        self.callbacks
            .iter()
            .find(|(entry, _)| *entry == addr)
            .map(|(_, callback)| *callback)
    }
}

/// Data memory shared by all harts, addressed from `base`.
#[derive(Debug, Copy, Clone)]
pub struct SimData<'a> {
    base: u64,
    words: &'a [AtomicU64],
}

const fn mask(width: Width) -> u64 {
    match width {
        Width::W64 => u64::MAX,
        w => (1 << (w.bytes() * 8)) - 1,
    }
}

impl<'a> SimData<'a> {
    #[must_use]
    pub const fn new(base: u64, words: &'a [AtomicU64]) -> Self {
        Self { base, words }
    }

    fn slot(&self, addr: u64, width: Width) -> Result<(&AtomicU64, u64), SimFault> {
        let off = addr
            .checked_sub(self.base)
            .ok_or(SimFault::DataOutOfBounds { addr })?;
        if off % width.bytes() != 0 {
            return Err(SimFault::Misaligned { addr });
        }
        let word = usize::try_from(off / 8)
            .ok()
            .and_then(|i| self.words.get(i))
            .ok_or(SimFault::DataOutOfBounds { addr })?;
        Ok((word, (off % 8) * 8))
    }

    /// # Errors
    /// Out-of-bounds or misaligned address.
    pub fn load(&self, addr: u64, width: Width) -> Result<u64, SimFault> {
        let (word, shift) = self.slot(addr, width)?;
        Ok((word.load(Ordering::SeqCst) >> shift) & mask(width))
    }

    /// Atomically replaces the value with `f(old)` unless `f` declines;
    /// returns the old value.
    ///
    /// # Errors
    /// Out-of-bounds or misaligned address.
    pub fn update(
        &self,
        addr: u64,
        width: Width,
        mut f: impl FnMut(u64) -> Option<u64>,
    ) -> Result<u64, SimFault> {
        let (word, shift) = self.slot(addr, width)?;
        let field = mask(width) << shift;
        let mut current = word.load(Ordering::SeqCst);
        loop {
            let old = (current & field) >> shift;
            let Some(new) = f(old) else {
                return Ok(old);
            };
            let merged = (current & !field) | ((new << shift) & field);
            match word.compare_exchange_weak(current, merged, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return Ok(old),
                Err(seen) => current = seen,
            }
        }
    }

    /// # Errors
    /// Out-of-bounds or misaligned address.
    pub fn store(&self, addr: u64, width: Width, value: u64) -> Result<(), SimFault> {
        self.update(addr, width, |_| Some(value)).map(|_| ())
    }

    /// Returns the old value; the store happened iff it equals `expected`.
    ///
    /// # Errors
    /// Out-of-bounds or misaligned address.
    pub fn compare_exchange(
        &self,
        addr: u64,
        width: Width,
        expected: u64,
        new: u64,
    ) -> Result<u64, SimFault> {
        let expected = expected & mask(width);
        self.update(addr, width, |old| (old == expected).then_some(new))
    }
}

#[derive(Debug, Copy, Clone)]
struct Monitor {
    addr: u64,
    width: Width,
    value: u64,
}

/// NZCV.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
struct Flags {
    n: bool,
    z: bool,
    c: bool,
    v: bool,
}

impl Flags {
    const fn holds(self, cond: u8) -> bool {
        let base = match cond >> 1 {
            0 => self.z,
            1 => self.c,
            2 => self.n,
            3 => self.v,
            4 => self.c && !self.z,
            5 => self.n == self.v,
            6 => !self.z && self.n == self.v,
            _ => true,
        };
        if cond & 1 == 1 && cond != 0xF {
            !base
        } else {
            base
        }
    }
}

/// Return address planted in `x30`; reaching it ends a call.
pub const RETURN_ADDR: u64 = 0xFFFF_FFFF_FFFF_FFFC;

const DEFAULT_STEP_LIMIT: u64 = 1 << 20;

/// One simulated core.
pub struct Hart<'t> {
    text: &'t [u32],
    base: u64,
    /// `x0`-`x30`, then `sp` at index 31.
    x: [u64; 32],
    flags: Flags,
    pc: u64,
    monitor: Option<Monitor>,
    step_limit: u64,
}

impl<'t> Hart<'t> {
    #[must_use]
    pub const fn new(text: &'t [u32], base: u64) -> Self {
        Self {
            text,
            base,
            x: [0; 32],
            flags: Flags {
                n: false,
                z: false,
                c: false,
                v: false,
            },
            pc: 0,
            monitor: None,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    #[must_use]
    pub const fn with_step_limit(mut self, steps: u64) -> Self {
        self.step_limit = steps;
        self
    }

    /// Calls the function at `entry` with `args` in `x0`.. and runs until it returns.
    ///
    /// # Errors
    /// The first fault raised by an instruction.
    pub fn call(&mut self, data: &SimData<'_>, entry: u64, args: &[u64]) -> Result<(), SimFault> {
        for (reg, arg) in self.x.iter_mut().zip(args) {
            *reg = *arg;
        }
        self.x[30] = RETURN_ADDR;
        self.pc = entry;
        let mut steps = 0;
        while self.pc != RETURN_ADDR {
            if steps == self.step_limit {
                return Err(SimFault::StepLimit { steps });
            }
            self.step(data)?;
            steps += 1;
        }
        Ok(())
    }

    /// Register `n` with `31` reading as zero.
    #[must_use]
    pub const fn reg(&self, n: u8) -> u64 {
        if n >= 31 { 0 } else { self.x[n as usize] }
    }

    pub fn set_reg(&mut self, n: u8, value: u64) {
        if n < 31 {
            self.x[usize::from(n)] = value;
        }
    }

    fn set_sized(&mut self, n: u8, sf: bool, value: u64) {
        self.set_reg(n, if sf { value } else { value & 0xFFFF_FFFF });
    }

    const fn reg_or_sp(&self, n: u8) -> u64 {
        self.x[(n & 31) as usize]
    }

    fn fetch(&self) -> Result<u32, SimFault> {
        let pc = self.pc;
        pc.checked_sub(self.base)
            .filter(|off| off % 4 == 0)
            .and_then(|off| usize::try_from(off / 4).ok())
            .and_then(|i| self.text.get(i).copied())
            .ok_or(SimFault::TextOutOfBounds { pc })
    }

    fn step(&mut self, data: &SimData<'_>) -> Result<(), SimFault> {
        let insn = self.fetch()?;
        let pc = self.pc;
        let undefined = SimFault::Undefined { pc, insn };
        let mut next = pc.wrapping_add(4);

        if insn & 0xFFFF_F01F == 0xD503_201F {
            // hints: nop, yield, wfe, sev, sevl
        } else if insn & 0xFFFF_F01F == 0xD503_301F {
            fence(Ordering::SeqCst);
        } else if insn & 0xFFC0_0000 == 0xF980_0000 {
            // prfm
        } else if insn & 0xFFFF_FC1F == 0xD65F_0000 {
            next = self.reg((insn >> 5) as u8 & 31);
        } else if let Some(kind) = PcRel::classify(insn) {
            let offset = kind.offset(insn).ok_or(undefined)?;
            let target = pc.wrapping_add_signed(offset);
            match kind {
                PcRel::Branch26 => {
                    if UncondBranch::from_bits(insn).link() {
                        self.set_reg(30, pc.wrapping_add(4));
                    }
                    next = target;
                }
                PcRel::Branch19 if insn & 0xFF00_0010 == 0x5400_0000 => {
                    if self.flags.holds(CondBranch::from_bits(insn).cond()) {
                        next = target;
                    }
                }
                PcRel::Branch19 => {
                    let cb = CompareBranch::from_bits(insn);
                    let value = self.reg(cb.rt()) & if cb.sf() { u64::MAX } else { 0xFFFF_FFFF };
                    if (value != 0) == cb.nonzero() {
                        next = target;
                    }
                }
                PcRel::Branch14 => {
                    let tb = TestBranch::from_bits(insn);
                    let bit = u32::from(tb.b40()) | (u32::from(tb.b5()) << 5);
                    if ((self.reg(tb.rt()) >> bit) & 1 != 0) == tb.nonzero() {
                        next = target;
                    }
                }
                PcRel::Adr => self.set_reg(PcRelAddr::from_bits(insn).rd(), target),
                PcRel::Adrp => {
                    let page = (pc & !0xFFF).wrapping_add_signed(offset);
                    self.set_reg(PcRelAddr::from_bits(insn).rd(), page);
                }
                PcRel::Literal => return Err(undefined),
            }
        } else if insn & 0x3F00_0000 == 0x0800_0000 {
            self.exclusive(data, insn).ok_or(undefined)??;
        } else if insn & 0x3F20_0C00 == 0x3820_0000 {
            self.atomic_memory(data, insn).ok_or(undefined)??;
        } else if insn & 0x1F00_0000 == 0x0A00_0000 || insn & 0x1F20_0000 == 0x0B00_0000 {
            self.data_proc_reg(insn).ok_or(undefined)?;
        } else if insn & 0x1F80_0000 == 0x1100_0000 {
            self.add_sub_imm(insn);
        } else if insn & 0x7F80_0000 == 0x5280_0000 {
            let rd = (insn & 31) as u8;
            let hw = (insn >> 21) & 3;
            let imm = u64::from((insn >> 5) & 0xFFFF) << (hw * 16);
            self.set_sized(rd, insn >> 31 == 1, imm);
        } else if insn & 0xBF80_0000 == 0xB900_0000 {
            self.load_store_imm(data, insn)?;
        } else {
            return Err(undefined);
        }

        self.pc = next;
        Ok(())
    }

    /// `None` for encodings outside the modelled subset.
    fn exclusive(&mut self, data: &SimData<'_>, insn: u32) -> Option<Result<(), SimFault>> {
        let e = LoadStoreExclusive::from_bits(insn);
        let width = Width::from_size_bits(e.size());
        let addr = self.reg_or_sp(e.rn());
        let sf = width.is_64();

        let result = match (e.o2(), e.o1(), e.load()) {
            (false, false, true) => data.load(addr, width).map(|value| {
                self.monitor = Some(Monitor { addr, width, value });
                self.set_sized(e.rt(), sf, value);
            }),
            (false, false, false) => {
                let new = self.reg(e.rt());
                let status = match self.monitor.take() {
                    Some(m) if m.addr == addr && m.width == width => {
                        match data.compare_exchange(addr, width, m.value, new) {
                            Ok(old) => u64::from(old != m.value),
                            Err(fault) => return Some(Err(fault)),
                        }
                    }
                    _ => 1,
                };
                self.set_reg(e.rs(), status);
                Ok(())
            }
            (true, true, _) => {
                let expected = self.reg(e.rs());
                let new = self.reg(e.rt());
                data.compare_exchange(addr, width, expected, new)
                    .map(|old| self.set_sized(e.rs(), sf, old))
            }
            (true, false, true) if e.o0() => data
                .load(addr, width)
                .map(|value| self.set_sized(e.rt(), sf, value)),
            (true, false, false) if e.o0() => data.store(addr, width, self.reg(e.rt())),
            _ => return None,
        };
        Some(result)
    }

    fn atomic_memory(&mut self, data: &SimData<'_>, insn: u32) -> Option<Result<(), SimFault>> {
        let m = AtomicMemory::from_bits(insn);
        let width = Width::from_size_bits(m.size());
        let addr = self.reg_or_sp(m.rn());
        let operand = self.reg(m.rs()) & mask(width);

        let result = if m.o3() {
            if m.opc() != 0 {
                return None;
            }
            data.update(addr, width, |_| Some(operand))
        } else {
            let op = LseOp::from_opc(m.opc())?;
            data.update(addr, width, |old| {
                Some(match op {
                    LseOp::Add => old.wrapping_add(operand),
                    LseOp::Clr => old & !operand,
                    LseOp::Eor => old ^ operand,
                    LseOp::Set => old | operand,
                })
            })
        };
        Some(result.map(|old| self.set_sized(m.rt(), width.is_64(), old)))
    }

    fn data_proc_reg(&mut self, insn: u32) -> Option<()> {
        let d = DataProcReg::from_bits(insn);
        if d.imm6() != 0 {
            return None;
        }
        let sf = d.sf();
        let width_mask = if sf { u64::MAX } else { 0xFFFF_FFFF };
        let a = self.reg(d.rn()) & width_mask;
        let b = self.reg(d.rm()) & width_mask;

        let result = if d.opcode() == 0b0_1010 {
            let b = if d.n() { !b & width_mask } else { b };
            let result = match d.opc() {
                0 | 3 => a & b,
                1 => a | b,
                _ => a ^ b,
            };
            if d.opc() == 3 {
                self.flags = Flags {
                    n: result & sign_bit(sf) != 0,
                    z: result == 0,
                    c: false,
                    v: false,
                };
            }
            result
        } else {
            if d.n() {
                return None;
            }
            let (result, flags) = add_sub(a, b, d.opc() & 2 != 0, sf);
            if d.opc() & 1 != 0 {
                self.flags = flags;
            }
            result
        };
        self.set_sized(d.rd(), sf, result);
        Some(())
    }

    fn add_sub_imm(&mut self, insn: u32) {
        let sf = insn >> 31 == 1;
        let sub = (insn >> 30) & 1 == 1;
        let set_flags = (insn >> 29) & 1 == 1;
        let shift = if (insn >> 22) & 1 == 1 { 12 } else { 0 };
        let imm = u64::from((insn >> 10) & 0xFFF) << shift;
        let rn = ((insn >> 5) & 31) as u8;
        let rd = (insn & 31) as u8;
        let width_mask = if sf { u64::MAX } else { 0xFFFF_FFFF };

        let (result, flags) = add_sub(self.reg_or_sp(rn) & width_mask, imm, sub, sf);
        if set_flags {
            self.flags = flags;
            self.set_sized(rd, sf, result);
        } else if rd == 31 {
            self.x[31] = result;
        } else {
            self.set_sized(rd, sf, result);
        }
    }

    fn load_store_imm(&mut self, data: &SimData<'_>, insn: u32) -> Result<(), SimFault> {
        let width = if insn >> 30 == 3 {
            Width::W64
        } else {
            Width::W32
        };
        let rt = (insn & 31) as u8;
        let rn = ((insn >> 5) & 31) as u8;
        let offset = u64::from((insn >> 10) & 0xFFF) * width.bytes();
        let addr = self.reg_or_sp(rn).wrapping_add(offset);
        if (insn >> 22) & 1 == 1 {
            let value = data.load(addr, width)?;
            self.set_sized(rt, width.is_64(), value);
            Ok(())
        } else {
            data.store(addr, width, self.reg(rt))
        }
    }
}

const fn sign_bit(sf: bool) -> u64 {
    if sf { 1 << 63 } else { 1 << 31 }
}

fn add_sub(a: u64, b: u64, sub: bool, sf: bool) -> (u64, Flags) {
    let width_mask = if sf { u64::MAX } else { 0xFFFF_FFFF };
    let b = if sub { !b & width_mask } else { b };
    let carry_in = u64::from(sub);
    let wide = u128::from(a) + u128::from(b) + u128::from(carry_in);
    #[allow(clippy::cast_possible_truncation)]
    let result = (wide as u64) & width_mask;
    let carry = if sf { wide >> 64 != 0 } else { wide >> 32 != 0 };
    let sign = sign_bit(sf);
    let flags = Flags {
        n: result & sign != 0,
        z: result == 0,
        c: carry,
        v: (!(a ^ b) & (a ^ result)) & sign != 0,
    };
    (result, flags)
}
