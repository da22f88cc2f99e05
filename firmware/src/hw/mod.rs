//! STM32G0 adapters for the `tester-core` hardware traits.
//!
//! Pin and peripheral assignment:
//!
//! | Signal          | Resource            |
//! |-----------------|---------------------|
//! | Zero-cross in   | PA0 / EXTI line 0   |
//! | TRIAC gate      | PB3                 |
//! | Test relay      | PB4                 |
//! | Mux select A/B  | PB5 / PB6           |
//! | Bond voltage    | PA1 / ADC1 IN1      |
//! | Bond current    | PA4 / ADC1 IN4      |
//! | Start button    | PC13 (active low)   |
//! | Firing timer    | TIM3                |
//! | Sampling timer  | TIM14               |
//!
//! The firing timer, sampling timer and zero-cross line are driven from
//! interrupt context, so their adapters program registers directly through
//! `pac` instead of the async Embassy drivers.

#![cfg(target_os = "none")]

use core::cell::RefCell;
use core::sync::atomic::{AtomicU16, Ordering};

use critical_section::Mutex;
use embassy_stm32::adc::{Adc, AdcChannel, AnyAdcChannel, SampleTime};
use embassy_stm32::gpio::{Input, Output};
use embassy_stm32::interrupt::{self, InterruptExt};
use embassy_stm32::pac;
use embassy_stm32::Peri;
use embassy_stm32::peripherals::{ADC1, DMA1_CH1, TIM14, TIM3};
use embassy_stm32::time::Hertz;
use embassy_stm32::timer::low_level::Timer as LowLevelTimer;
use embassy_time::{Duration, block_for};
use tester_core::hardware::{AdcSink, GateOutput, MuxPath, RelayOutput, SamplePair, TimerSink};
use tester_core::phase::TIMER_TICK_HZ;
use tester_core::sampling::SAMPLING_PERIOD;
use tester_core::session::TestRig;

/// EXTI line and GPIO port index of the zero-cross input (PA0).
const ZERO_CROSS_LINE: usize = 0;
const ZERO_CROSS_PORT: u8 = 0;

/// ADC1 channels for the bond voltage and current.
const VOLTAGE_CHANNEL: usize = 1;
const CURRENT_CHANNEL: usize = 4;

/// Delay between the first conversion and enabling the sampling timer.
const SETTLE_DELAY: Duration = Duration::from_micros(50);

/// Sampling timer update rate.
const SAMPLING_HZ: u32 = 1_000_000_000 / SAMPLING_PERIOD.subsec_nanos();

/// Output driving the TRIAC gate.
pub struct GatePin {
    pin: Output<'static>,
}

impl GatePin {
    pub fn new(pin: Output<'static>) -> Self {
        Self { pin }
    }
}

impl GateOutput for GatePin {
    fn assert_gate(&mut self) {
        self.pin.set_high();
    }

    fn release_gate(&mut self) {
        self.pin.set_low();
    }
}

static RELAY: Mutex<RefCell<Option<Output<'static>>>> = Mutex::new(RefCell::new(None));

/// Handle to the test relay output.
///
/// The phase controller's recovery path and the session both switch the
/// relay, so the pin lives in a critical-section cell shared by every handle.
#[derive(Clone, Copy)]
pub struct RelayLine {
    _private: (),
}

impl RelayLine {
    pub fn install(pin: Output<'static>) -> Self {
        critical_section::with(|cs| {
            RELAY.borrow_ref_mut(cs).replace(pin);
        });
        Self { _private: () }
    }

    fn drive(self, energized: bool) {
        critical_section::with(|cs| {
            if let Some(pin) = RELAY.borrow_ref_mut(cs).as_mut() {
                if energized {
                    pin.set_high();
                } else {
                    pin.set_low();
                }
            }
        });
    }
}

impl RelayOutput for RelayLine {
    fn energize(&mut self) {
        self.drive(true);
    }

    fn de_energize(&mut self) {
        self.drive(false);
    }
}

/// One-shot firing timer on TIM3 ticking at [`TIMER_TICK_HZ`].
pub struct FiringTimer {
    timer: LowLevelTimer<'static, TIM3>,
}

impl FiringTimer {
    pub fn new(timer: LowLevelTimer<'static, TIM3>) -> Self {
        let regs = timer.regs_core();
        let prescaler = (timer.get_clock_frequency().0 / TIMER_TICK_HZ).saturating_sub(1);
        timer.stop();
        regs.psc().write_value(u16::try_from(prescaler).unwrap_or(u16::MAX));
        regs.egr().write(|r| r.set_ug(true));
        timer.clear_update_interrupt();
        timer.enable_update_interrupt(false);

        interrupt::TIM3_TIM4.unpend();
        unsafe { interrupt::TIM3_TIM4.enable() };
        Self { timer }
    }

    fn load(&self, ticks: u16) {
        let regs = self.timer.regs_core();
        regs.cnt().write(|r| r.set_cnt(0));
        regs.arr().write(|r| r.set_arr(ticks.max(1)));
    }
}

impl TimerSink for FiringTimer {
    fn start(&mut self, ticks: u16) {
        self.timer.stop();
        self.load(ticks);
        self.timer.clear_update_interrupt();
        self.timer.enable_update_interrupt(true);
        self.timer.start();
    }

    fn reload(&mut self, ticks: u16) {
        self.load(ticks);
    }

    fn halt(&mut self) {
        self.timer.stop();
        self.timer.enable_update_interrupt(false);
        self.timer.clear_update_interrupt();
    }
}

/// Acknowledges the firing timer update event from its interrupt handler.
pub fn acknowledge_firing_timer() {
    pac::TIM3.sr().modify(|r| r.set_uif(false));
}

/// Acknowledges the sampling timer update event from its interrupt handler.
pub fn acknowledge_sampling_timer() {
    pac::TIM14.sr().modify(|r| r.set_uif(false));
}

/// Acknowledges a zero-cross edge from the EXTI handler.
pub fn acknowledge_zero_cross() {
    pac::EXTI.rpr(0).write(|r| r.set_line(ZERO_CROSS_LINE, true));
}

fn configure_zero_cross_line() {
    pac::EXTI
        .exticr(ZERO_CROSS_LINE / 4)
        .modify(|r| r.set_exti(ZERO_CROSS_LINE % 4, ZERO_CROSS_PORT));
    pac::EXTI
        .rtsr(0)
        .modify(|r| r.set_line(ZERO_CROSS_LINE, true));
    pac::EXTI
        .ftsr(0)
        .modify(|r| r.set_line(ZERO_CROSS_LINE, false));
    pac::EXTI
        .imr(0)
        .modify(|r| r.set_line(ZERO_CROSS_LINE, false));
}

/// Starts the next regular sequence on ADC1.
fn start_adc_sequence() {
    pac::ADC1.cr().modify(|r| r.set_adstart(true));
}

/// ADC request line on DMAMUX1.
const ADC_DMA_REQUEST: u8 = 5;

/// Latest voltage/current results, written by DMA1 channel 1.
static ADC_RESULTS: [AtomicU16; 2] = [const { AtomicU16::new(0) }; 2];

/// Two-channel ADC1 scan delivered by circular DMA.
///
/// Each sequence lands in [`ADC_RESULTS`]; the interrupt only checks `EOS`
/// once and never waits on the converter.
pub struct BondAdc {
    _adc: Adc<'static, ADC1>,
    _dma: Peri<'static, DMA1_CH1>,
}

impl BondAdc {
    pub fn new(
        mut adc: Adc<'static, ADC1>,
        dma: Peri<'static, DMA1_CH1>,
        mut voltage: AnyAdcChannel<ADC1>,
        mut current: AnyAdcChannel<ADC1>,
    ) -> Self {
        adc.set_sample_time(SampleTime::CYCLES12_5);
        // One blocking read per channel puts both pins in analog mode.
        let _ = adc.blocking_read(&mut voltage);
        let _ = adc.blocking_read(&mut current);

        configure_result_dma();

        let regs = pac::ADC1;
        regs.cfgr1().modify(|r| {
            r.set_wait(false);
            r.set_cont(false);
            r.set_discen(false);
            r.set_dmacfg(pac::adc::vals::Dmacfg::CIRCULAR);
            r.set_dmaen(true);
        });
        regs.chselr().write(|r| {
            r.set_chsel(VOLTAGE_CHANNEL, true);
            r.set_chsel(CURRENT_CHANNEL, true);
        });
        regs.isr().write(|r| {
            r.set_ccrdy(true);
            r.set_eos(true);
            r.set_ovr(true);
        });

        Self {
            _adc: adc,
            _dma: dma,
        }
    }
}

/// Points DMA1 channel 1 at `ADC1.DR`, two half-words, circular.
fn configure_result_dma() {
    pac::RCC.ahbenr().modify(|r| r.set_dma1en(true));
    pac::DMAMUX1
        .ccr(0)
        .write(|r| r.set_dmareq_id(ADC_DMA_REQUEST));

    let ch = pac::DMA1.ch(0);
    ch.cr().write(|r| r.set_en(false));
    ch.par().write_value(pac::ADC1.dr().as_ptr() as u32);
    ch.mar().write_value(ADC_RESULTS.as_ptr() as u32);
    ch.ndtr().write(|r| r.set_ndt(2));
    ch.cr().write(|r| {
        r.set_dir(pac::bdma::vals::Dir::FROM_PERIPHERAL);
        r.set_psize(pac::bdma::vals::Size::BITS16);
        r.set_msize(pac::bdma::vals::Size::BITS16);
        r.set_minc(true);
        r.set_circ(true);
        r.set_en(true);
    });
}

impl AdcSink for BondAdc {
    fn read(&mut self) -> Option<SamplePair> {
        let regs = pac::ADC1;
        if !regs.isr().read().eos() {
            return None;
        }
        regs.isr().write(|r| r.set_eos(true));

        // Channels convert in ascending order: voltage (IN1) then current (IN4).
        Some(SamplePair::new(
            ADC_RESULTS[0].load(Ordering::Relaxed),
            ADC_RESULTS[1].load(Ordering::Relaxed),
        ))
    }

    fn start_conversion(&mut self) {
        start_adc_sequence();
    }
}

/// Session-side peripherals: relay, analog mux, zero-cross line and sampling timer.
pub struct BondRig {
    relay: RelayLine,
    mux_a: Output<'static>,
    mux_b: Output<'static>,
    sampling_timer: LowLevelTimer<'static, TIM14>,
    _zero_cross: Input<'static>,
}

impl BondRig {
    pub fn new(
        relay: RelayLine,
        mux_a: Output<'static>,
        mux_b: Output<'static>,
        sampling_timer: LowLevelTimer<'static, TIM14>,
        zero_cross: Input<'static>,
    ) -> Self {
        configure_zero_cross_line();

        sampling_timer.stop();
        sampling_timer.set_frequency(Hertz(SAMPLING_HZ));
        sampling_timer.clear_update_interrupt();
        sampling_timer.enable_update_interrupt(false);

        let mut rig = Self {
            relay,
            mux_a,
            mux_b,
            sampling_timer,
            _zero_cross: zero_cross,
        };
        rig.select_path(MuxPath::Idle);
        rig.relay.de_energize();
        rig
    }
}

impl TestRig for BondRig {
    fn energize_relay(&mut self) {
        self.relay.energize();
    }

    fn de_energize_relay(&mut self) {
        self.relay.de_energize();
    }

    fn select_path(&mut self, path: MuxPath) {
        let (a, b) = path.select_lines();
        self.mux_a.set_level(a.into());
        self.mux_b.set_level(b.into());
    }

    fn enable_zero_cross(&mut self) {
        acknowledge_zero_cross();
        pac::EXTI
            .imr(0)
            .modify(|r| r.set_line(ZERO_CROSS_LINE, true));
        interrupt::EXTI0_1.unpend();
        unsafe { interrupt::EXTI0_1.enable() };
    }

    fn disable_zero_cross(&mut self) {
        interrupt::EXTI0_1.disable();
        pac::EXTI
            .imr(0)
            .modify(|r| r.set_line(ZERO_CROSS_LINE, false));
        acknowledge_zero_cross();
    }

    fn start_conversion(&mut self) {
        start_adc_sequence();
    }

    fn settle(&mut self) {
        block_for(SETTLE_DELAY);
    }

    fn start_sampling(&mut self) {
        self.sampling_timer.reset();
        self.sampling_timer.clear_update_interrupt();
        self.sampling_timer.enable_update_interrupt(true);
        interrupt::TIM14.unpend();
        unsafe { interrupt::TIM14.enable() };
        self.sampling_timer.start();
    }

    fn stop_sampling(&mut self) {
        self.sampling_timer.stop();
        self.sampling_timer.enable_update_interrupt(false);
        interrupt::TIM14.disable();
        self.sampling_timer.clear_update_interrupt();
    }
}
