//! Public interface and per-step tick driver

use crate::apu::Apu;
use crate::bus::Bus;
use crate::control::ControlRegisters;
use crate::cpu::CpuCore;
use crate::dma::DmaUnit;
use crate::graphics::RgbaFrameBuffer;
use crate::inputs::{InputState, TomboyButton};
use crate::interrupts::InterruptRegisters;
use crate::memory::Memory;
use crate::net::NetworkPort;
use crate::ppu::Ppu;
use crate::program::{Program, ProgramLoadError};
use crate::rtc::RealTimeClock;
use crate::timer::Timer;
use crate::ppu;
use std::fmt::{Debug, Display};
use thiserror::Error;
use tomboy_common::frontend::{AudioOutput, Color, FrameSink, SaveWriter, TickEffect, TickResult};

#[derive(Debug, Error)]
pub enum TomboyError<RErr, AErr> {
    #[error("Error delivering a frame: {0}")]
    Rendering(RErr),
    #[error("Error outputting audio samples: {0}")]
    Audio(AErr),
    #[error("Hardware invariant violated inside the pixel pipeline; this is an emulator bug")]
    InvariantViolation,
}

pub struct TomboyEmulator<C> {
    cpu: C,
    program: Program,
    ppu: Ppu,
    apu: Apu,
    memory: Memory,
    net: NetworkPort,
    rtc: RealTimeClock,
    interrupt_registers: InterruptRegisters,
    control: ControlRegisters,
    timer: Timer,
    dma_unit: DmaUnit,
    input_state: InputState,
    rgba_buffer: RgbaFrameBuffer,
    frame_count: u64,
}

impl<C: CpuCore> TomboyEmulator<C> {
    /// Validate the program image and construct a powered-on console around the given CPU.
    ///
    /// # Errors
    ///
    /// This function will return an error if the program image is invalid; no partially
    /// constructed emulator is returned.
    pub fn create<S: SaveWriter>(
        cpu: C,
        rom: Vec<u8>,
        save_writer: &mut S,
    ) -> Result<Self, ProgramLoadError> {
        let program = Program::parse(rom)?;

        let initial_sram = save_writer.load_bytes("sav").ok();
        let memory = Memory::new(program.wram_len(), program.sram_len(), initial_sram);

        Ok(Self {
            cpu,
            program,
            ppu: Ppu::new(),
            apu: Apu::new(),
            memory,
            net: NetworkPort::new(),
            rtc: RealTimeClock::new(),
            interrupt_registers: InterruptRegisters::default(),
            control: ControlRegisters::new(),
            timer: Timer::new(),
            dma_unit: DmaUnit::new(),
            input_state: InputState::new(),
            rgba_buffer: RgbaFrameBuffer::default(),
            frame_count: 0,
        })
    }

    /// Advance the console by one CPU machine step.
    ///
    /// Completed frames are delivered through `frame_sink` and audio samples through
    /// `audio_output` as side effects of the step. `TickEffect::Shutdown` is reported once the
    /// CPU has halted with no interrupt enabled or pending.
    ///
    /// # Errors
    ///
    /// Propagates frame/audio delivery errors, and reports an internal invariant violation
    /// (which aborts the step) as `TomboyError::InvariantViolation`.
    pub fn tick<R, A>(
        &mut self,
        frame_sink: &mut R,
        audio_output: &mut A,
    ) -> TickResult<TomboyError<R::Err, A::Err>>
    where
        R: FrameSink,
        R::Err: Debug + Display + Send + Sync + 'static,
        A: AudioOutput,
        A::Err: Debug + Display + Send + Sync + 'static,
    {
        self.cpu.execute_step(&mut Bus {
            program: &self.program,
            ppu: &mut self.ppu,
            apu: &mut self.apu,
            memory: &mut self.memory,
            net: &mut self.net,
            rtc: &mut self.rtc,
            interrupt_registers: &mut self.interrupt_registers,
            control: &mut self.control,
            timer: &mut self.timer,
            dma_unit: &mut self.dma_unit,
            input_state: &mut self.input_state,
            rgba_buffer: &self.rgba_buffer,
        });

        if self.ppu.take_invariant_violation() {
            return Err(TomboyError::InvariantViolation);
        }

        while let Some((sample_l, sample_r)) = self.apu.pop_sample() {
            audio_output.push_sample(sample_l, sample_r).map_err(TomboyError::Audio)?;
        }

        self.input_state.check_for_joypad_interrupt(&mut self.interrupt_registers);

        if self.ppu.frame_complete() {
            self.ppu.clear_frame_complete();

            self.rgba_buffer.copy_from(self.ppu.frame_buffer());
            frame_sink
                .render_frame(&self.rgba_buffer, ppu::FRAME_SIZE)
                .map_err(TomboyError::Rendering)?;

            self.frame_count += 1;
            return Ok(TickEffect::FrameRendered);
        }

        if self.cpu.halted() && self.interrupt_registers.none_pending() {
            // The CPU can never wake up again; ask the host to shut down
            return Ok(TickEffect::Shutdown);
        }

        Ok(TickEffect::None)
    }

    pub fn press(&mut self, button: TomboyButton) {
        self.input_state.inputs_mut().set_button(button, true);
    }

    pub fn release(&mut self, button: TomboyButton) {
        self.input_state.inputs_mut().set_button(button, false);
    }

    /// Persist battery-backed SRAM if it changed since the last call; intended for shutdown and
    /// periodic saves.
    ///
    /// # Errors
    ///
    /// Propagates save writer errors; the emulator itself is unaffected.
    pub fn persist_sram<S: SaveWriter>(&mut self, save_writer: &mut S) -> Result<(), S::Err> {
        if self.program.sram_len() != 0 && self.memory.get_and_clear_sram_dirty() {
            save_writer.persist_bytes("sav", self.memory.sram())?;
        }

        Ok(())
    }

    /// The most recently completed frame, 160x144 RGBA8888, row-major from the top-left
    #[must_use]
    pub fn frame_buffer(&self) -> &[Color] {
        &self.rgba_buffer
    }

    /// The external CPU driving this console
    #[must_use]
    pub fn cpu(&self) -> &C {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut C {
        &mut self.cpu
    }

    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The network send page, for the host shell to transmit
    #[must_use]
    pub fn net_outgoing(&self) -> &[u8] {
        self.net.outgoing()
    }

    /// Store received network data where the program will read it
    pub fn net_deliver(&mut self, data: &[u8]) {
        self.net.deliver_incoming(data);
    }

    /// Reset all hardware state to power-on defaults, keeping the program and battery-backed
    /// SRAM. The external CPU is the caller's to reset.
    pub fn reset(&mut self) {
        let sram = self.memory.sram().to_vec();

        self.ppu = Ppu::new();
        self.apu = Apu::new();
        self.memory = Memory::new(self.program.wram_len(), self.program.sram_len(), Some(sram));
        self.net = NetworkPort::new();
        self.rtc = RealTimeClock::new();
        self.interrupt_registers = InterruptRegisters::default();
        self.control = ControlRegisters::new();
        self.timer = Timer::new();
        self.dma_unit = DmaUnit::new();
        self.input_state = InputState::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program;
    use std::collections::VecDeque;
    use tomboy_common::frontend::FrameSize;

    #[derive(Debug, Clone, Copy)]
    enum CpuOp {
        Read(u32),
        Write(u32, u8),
        Idle,
    }

    /// Scripted CPU: performs one queued bus operation per machine step, then idles forever
    struct ScriptedCpu {
        ops: VecDeque<CpuOp>,
        last_read: u8,
        halt_when_done: bool,
    }

    impl ScriptedCpu {
        fn idle() -> Self {
            Self { ops: VecDeque::new(), last_read: 0, halt_when_done: false }
        }

        fn run(ops: impl IntoIterator<Item = CpuOp>) -> Self {
            Self { ops: ops.into_iter().collect(), last_read: 0, halt_when_done: false }
        }
    }

    impl CpuCore for ScriptedCpu {
        fn execute_step<B: crate::cpu::BusInterface>(&mut self, bus: &mut B) {
            match self.ops.pop_front() {
                Some(CpuOp::Read(address)) => self.last_read = bus.read(address),
                Some(CpuOp::Write(address, value)) => bus.write(address, value),
                Some(CpuOp::Idle) | None => bus.idle(),
            }
        }

        fn halted(&self) -> bool {
            self.halt_when_done && self.ops.is_empty()
        }
    }

    struct CountingSink {
        frames: u32,
    }

    impl FrameSink for CountingSink {
        type Err = String;

        fn render_frame(
            &mut self,
            frame_buffer: &[Color],
            frame_size: FrameSize,
        ) -> Result<(), Self::Err> {
            assert_eq!(frame_size, ppu::FRAME_SIZE);
            assert_eq!(frame_buffer.len(), ppu::FRAME_BUFFER_LEN);
            self.frames += 1;
            Ok(())
        }
    }

    struct NullAudio {
        samples: u64,
    }

    impl AudioOutput for NullAudio {
        type Err = String;

        fn push_sample(&mut self, _sample_l: f32, _sample_r: f32) -> Result<(), Self::Err> {
            self.samples += 1;
            Ok(())
        }
    }

    struct NullSaveWriter;

    impl SaveWriter for NullSaveWriter {
        type Err = String;

        fn load_bytes(&mut self, _extension: &str) -> Result<Vec<u8>, Self::Err> {
            Err("nothing persisted".into())
        }

        fn persist_bytes(&mut self, _extension: &str, _bytes: &[u8]) -> Result<(), Self::Err> {
            Ok(())
        }
    }

    fn create_emulator(cpu: ScriptedCpu) -> TomboyEmulator<ScriptedCpu> {
        TomboyEmulator::create(cpu, program::test_image(0x8000, 0x400), &mut NullSaveWriter)
            .unwrap()
    }

    #[test]
    fn first_frame_after_one_frame_of_cycles() {
        let mut emulator = create_emulator(ScriptedCpu::idle());
        let mut sink = CountingSink { frames: 0 };
        let mut audio = NullAudio { samples: 0 };

        // 144 lines of 456 dots at 4 dots per idle step
        let steps_to_vblank = 144 * 456 / 4;
        for step in 0..steps_to_vblank {
            let effect = emulator.tick(&mut sink, &mut audio).unwrap();
            if step < steps_to_vblank - 1 {
                assert_eq!(effect, TickEffect::None);
            } else {
                assert_eq!(effect, TickEffect::FrameRendered);
            }
        }

        assert_eq!(sink.frames, 1);
        assert_ne!(emulator.interrupt_registers.read_if() & 0x01, 0);

        // The second frame arrives a full 154-line frame later
        for _ in 0..154 * 456 / 4 {
            emulator.tick(&mut sink, &mut audio).unwrap();
        }
        assert_eq!(sink.frames, 2);
    }

    #[test]
    fn audio_samples_arrive_at_output_rate() {
        let mut emulator = create_emulator(ScriptedCpu::idle());
        let mut sink = CountingSink { frames: 0 };
        let mut audio = NullAudio { samples: 0 };

        // One emulated second = 2^20 bus cycles
        for _ in 0..(1 << 20) {
            emulator.tick(&mut sink, &mut audio).unwrap();
        }

        assert_eq!(audio.samples, 44_100);
    }

    #[test]
    fn oam_dma_copies_through_the_bus() {
        let mut ops = Vec::new();
        // Fill WRAM 0xC0002200.. with a recognizable pattern
        for i in 0..160 {
            ops.push(CpuOp::Write(0xC000_2200 + i, (0x30 + i) as u8));
        }
        // DMA2=0x00, DMA3=0x22, then initiate from page 0xC0
        ops.push(CpuOp::Write(0xFFFF_FF47, 0x00));
        ops.push(CpuOp::Write(0xFFFF_FF48, 0x22));
        ops.push(CpuOp::Write(0xFFFF_FF49, 0xC0));
        // OAM is unreadable while the copy runs
        ops.push(CpuOp::Read(0xE002_0000));
        for _ in 0..160 {
            ops.push(CpuOp::Idle);
        }
        ops.push(CpuOp::Read(0xE002_009F));

        let mut emulator = create_emulator(ScriptedCpu::run(ops));
        let mut sink = CountingSink { frames: 0 };
        let mut audio = NullAudio { samples: 0 };

        // Run into VBLANK so OAM is CPU-visible for the assertions
        for _ in 0..144 * 456 / 4 + 100 {
            emulator.tick(&mut sink, &mut audio).unwrap();
        }

        for i in 0..160_u8 {
            assert_eq!(emulator.ppu.read_oam(u32::from(i)), 0x30 + i, "OAM[{i}]");
        }
    }

    #[test]
    fn shutdown_reported_when_cpu_halts_with_no_interrupts() {
        let mut cpu = ScriptedCpu::run([CpuOp::Write(0xFFFF_FFFF, 0x00), CpuOp::Idle]);
        cpu.halt_when_done = true;

        let mut emulator = create_emulator(cpu);
        let mut sink = CountingSink { frames: 0 };
        let mut audio = NullAudio { samples: 0 };

        assert_eq!(emulator.tick(&mut sink, &mut audio).unwrap(), TickEffect::None);
        assert_eq!(emulator.tick(&mut sink, &mut audio).unwrap(), TickEffect::Shutdown);
    }

    #[test]
    fn wram_round_trip_through_the_bus() {
        let ops = [
            CpuOp::Write(0xC000_1234, 0xA5),
            CpuOp::Read(0xC000_1234),
            // Unmapped region reads open bus
            CpuOp::Read(0x5000_0000),
        ];
        let mut emulator = create_emulator(ScriptedCpu::run(ops));
        let mut sink = CountingSink { frames: 0 };
        let mut audio = NullAudio { samples: 0 };

        emulator.tick(&mut sink, &mut audio).unwrap();
        emulator.tick(&mut sink, &mut audio).unwrap();
        assert_eq!(emulator.cpu.last_read, 0xA5);

        emulator.tick(&mut sink, &mut audio).unwrap();
        assert_eq!(emulator.cpu.last_read, 0xFF);
    }

    #[test]
    fn sram_persists_only_when_dirty() {
        struct RecordingSaveWriter {
            saves: u32,
        }

        impl SaveWriter for RecordingSaveWriter {
            type Err = String;

            fn load_bytes(&mut self, _extension: &str) -> Result<Vec<u8>, Self::Err> {
                Err("nothing persisted".into())
            }

            fn persist_bytes(&mut self, _extension: &str, bytes: &[u8]) -> Result<(), Self::Err> {
                assert_eq!(bytes.len(), 0x400);
                self.saves += 1;
                Ok(())
            }
        }

        let mut emulator =
            create_emulator(ScriptedCpu::run([CpuOp::Write(0x8000_0010, 0x77)]));
        let mut sink = CountingSink { frames: 0 };
        let mut audio = NullAudio { samples: 0 };
        let mut save_writer = RecordingSaveWriter { saves: 0 };

        emulator.persist_sram(&mut save_writer).unwrap();
        assert_eq!(save_writer.saves, 0);

        emulator.tick(&mut sink, &mut audio).unwrap();
        emulator.persist_sram(&mut save_writer).unwrap();
        assert_eq!(save_writer.saves, 1);
    }
}
