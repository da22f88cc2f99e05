use core::cell::RefCell;

use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::{Adc, AdcChannel};
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_stm32::interrupt;
use embassy_stm32::rcc;
use embassy_stm32::timer::low_level::Timer as LowLevelTimer;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use static_cell::StaticCell;
use tester_core::phase::{PhaseController, SharedPhase};
use tester_core::sampling::{SamplingPipeline, SharedSampling};
use tester_core::session::SessionSlot;

use crate::display::DisplayQueue;
use crate::hw::{self, BondAdc, BondRig, FiringTimer, GatePin, RelayLine};
use crate::supervisor::StartQueue;
use crate::telemetry::TelemetryRecorder;

mod button_task;
mod display_task;
mod session_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        cortex_m::interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                cortex_m::interrupt::enable();
            }
        }
    }
}

pub(super) type FiringPhase = SharedPhase<GatePin, FiringTimer, RelayLine>;
pub(super) type BondSampling = SharedSampling<BondAdc>;
pub(super) type SharedTelemetry = Mutex<ThreadModeRawMutex, RefCell<TelemetryRecorder>>;

pub(super) static PHASE: FiringPhase = SharedPhase::new();
pub(super) static SAMPLING: BondSampling = SharedSampling::new();
pub(super) static SESSION_SLOT: SessionSlot = SessionSlot::new();
pub(super) static START_QUEUE: StartQueue = StartQueue::new();
pub(super) static DISPLAY_QUEUE: DisplayQueue = DisplayQueue::new();
static TELEMETRY: StaticCell<SharedTelemetry> = StaticCell::new();

#[interrupt]
fn EXTI0_1() {
    hw::acknowledge_zero_cross();
    PHASE.on_zero_cross();
}

#[interrupt]
fn TIM3_TIM4() {
    hw::acknowledge_firing_timer();
    PHASE.on_timer_expired();
}

#[interrupt]
fn TIM14() {
    hw::acknowledge_sampling_timer();
    SAMPLING.on_tick();
}

/// 60 MHz system clock from HSI16 so TIM3 divides evenly to the phase tick.
fn clock_config() -> hal::Config {
    let mut config = hal::Config::default();
    config.rcc.pll = Some(rcc::Pll {
        source: rcc::PllSource::HSI,
        prediv: rcc::PllPreDiv::DIV1,
        mul: rcc::PllMul::MUL15,
        divp: None,
        divq: None,
        divr: Some(rcc::PllRDiv::DIV4),
    });
    config.rcc.sys = rcc::Sysclk::PLL1_R;
    config
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let hal::Peripherals {
        PA0,
        PA1,
        PA4,
        PB3,
        PB4,
        PB5,
        PB6,
        PC13,
        ADC1,
        DMA1_CH1,
        TIM3,
        TIM14,
        ..
    } = hal::init(clock_config());

    let relay = RelayLine::install(Output::new(PB4, Level::Low, Speed::Low));

    PHASE.install(PhaseController::new(
        GatePin::new(Output::new(PB3, Level::Low, Speed::VeryHigh)),
        FiringTimer::new(LowLevelTimer::new(TIM3)),
        relay,
    ));

    SAMPLING.install(
        SamplingPipeline::new(),
        BondAdc::new(
            Adc::new(ADC1),
            DMA1_CH1,
            PA1.degrade_adc(),
            PA4.degrade_adc(),
        ),
    );

    let rig = BondRig::new(
        relay,
        Output::new(PB5, Level::Low, Speed::Low),
        Output::new(PB6, Level::Low, Speed::Low),
        LowLevelTimer::new(TIM14),
        Input::new(PA0, Pull::None),
    );

    let telemetry: &'static SharedTelemetry =
        TELEMETRY.init(Mutex::new(RefCell::new(TelemetryRecorder::new())));

    spawner
        .spawn(session_task::run(rig, telemetry))
        .expect("failed to spawn session task");

    spawner
        .spawn(display_task::run())
        .expect("failed to spawn display task");

    spawner
        .spawn(button_task::run(Input::new(PC13, Pull::Up), telemetry))
        .expect("failed to spawn button task");

    core::future::pending::<()>().await;
}
