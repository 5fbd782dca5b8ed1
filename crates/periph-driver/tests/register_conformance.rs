//! Register-level conformance
//!
//! The simulated devices are wrapped in a recording block so the exact
//! sequence of reads and writes can be checked: W1C acknowledgments are a
//! single write of the observed bits, W1P commands pulse then clear, and only
//! the device that raised a shared interrupt claims it.

use periph_driver::chip::regs::{axi_dma, fir, timer};
use periph_driver::chip::Block;
use periph_driver::sim::{
    Access, RecordingBlock, SimAxiDma, SimCompletion, SimFir, SimPlatform, SimTimer,
};
use periph_driver::{
    BulkStrategy, CompletionSignal, FirFilter, IrqReturn, Registers, SessionConfig,
    SharedIrqLine, SmartTimer, TransferSession,
};
use std::sync::Arc;
use std::time::Duration;

fn writes_to(log: &[Access], offset: usize) -> Vec<u32> {
    log.iter()
        .filter_map(|a| match *a {
            Access::Write(o, v) if o == offset => Some(v),
            _ => None,
        })
        .collect()
}

#[test]
fn test_fir_done_ack_is_single_w1c_write() {
    let rec = Arc::new(RecordingBlock::new(SimFir::new()));
    let regs = Registers::new(rec.clone());
    let signal = CompletionSignal::new(regs.clone(), fir::fields::DONE, None).expect("signal");

    regs.write(fir::fields::LEN, 4);
    regs.write(fir::fields::EN, 1);
    regs.pulse(fir::fields::START);
    rec.take();

    assert_eq!(signal.irq_handle().on_interrupt(), IrqReturn::Handled);
    assert_eq!(
        rec.take(),
        vec![
            Access::Read(fir::STATUS, fir::status::DONE),
            Access::Write(fir::STATUS, fir::status::DONE),
        ]
    );
    assert_eq!(regs.read(fir::fields::DONE), 0);
    rec.take();

    // Nothing pending: one read, no write
    assert_eq!(signal.irq_handle().on_interrupt(), IrqReturn::NotMine);
    assert_eq!(rec.take(), vec![Access::Read(fir::STATUS, 0)]);
    assert_eq!(signal.count(), 1);
}

#[test]
fn test_w1p_start_pulses_and_reads_back_zero() {
    let rec = Arc::new(RecordingBlock::new(SimFir::new()));
    let regs = Registers::new(rec.clone());
    regs.write(fir::fields::EN, 1);
    regs.write(fir::fields::LEN, 1);
    rec.take();

    regs.pulse(fir::fields::START);
    assert_eq!(
        writes_to(&rec.take(), fir::CTRL),
        vec![fir::ctrl::EN | fir::ctrl::START, fir::ctrl::EN]
    );
    assert_eq!(regs.read(fir::fields::START), 0);
    assert_eq!(regs.read(fir::fields::EN), 1);
}

#[test]
fn test_timer_rst_pulse_preserves_enable() {
    let rec = Arc::new(RecordingBlock::new(SimTimer::new()));
    let smart = SmartTimer::new(Registers::new(rec.clone())).expect("timer");
    smart.enable();
    rec.take();

    smart.reset_counter();
    assert_eq!(
        writes_to(&rec.take(), timer::CTRL),
        vec![timer::ctrl::EN | timer::ctrl::RST, timer::ctrl::EN]
    );
    assert!(smart.is_enabled());
}

#[test]
fn test_shared_line_only_owner_claims() {
    let line = SharedIrqLine::new(7);
    let sim_timer = SimTimer::new();
    let sim_fir = SimFir::new();
    sim_timer.connect(&line);
    sim_fir.connect(&line);

    let mut smart = SmartTimer::new(Registers::new(Arc::new(sim_timer.clone()))).expect("timer");
    smart.attach(&line);
    smart.enable();

    let fir_regs = Registers::new(Arc::new(sim_fir));
    let mut fir_done =
        CompletionSignal::new(fir_regs.clone(), fir::fields::DONE, None).expect("signal");
    fir_done.attach(&line);
    assert_eq!(line.handler_count(), 2);

    // FIR finishes: only the FIR signal counts it
    fir_regs.write(fir::fields::LEN, 2);
    fir_regs.write(fir::fields::EN, 1);
    fir_regs.pulse(fir::fields::START);
    assert_eq!(fir_done.count(), 1);
    assert_eq!(smart.wrap_count(), 0);

    // Timer wraps: only the timer counts it
    assert!(sim_timer.wrap());
    assert_eq!(smart.wrap_count(), 1);
    assert_eq!(fir_done.count(), 1);

    assert_eq!(line.raised(), 2);
    assert_eq!(line.spurious(), 0);
    assert_eq!(smart.status() & timer::status::WRAP, 0);
}

#[test]
fn test_fir_filter_beside_timer_on_platform_line() {
    let platform = SimPlatform::new(SimCompletion::Immediate);
    let mut smart = SmartTimer::new(platform.registers(Block::SmartTimer)).expect("timer");
    smart.attach(platform.line());
    smart.enable();
    let mut filter = FirFilter::new(platform.registers(Block::Fir)).expect("filter");
    filter.attach(platform.line());

    filter.set_taps(&[0x7FFF]).expect("taps");
    let mut out = [0i16; 4];
    let n = filter
        .filter(&[10, 20, -30, 40], &mut out, Duration::from_secs(1))
        .expect("filter");
    assert_eq!(n, 4);
    assert_eq!(out, [9, 19, -30, 39]);
    assert_eq!(filter.completions(), 1);
    assert_eq!(smart.wrap_count(), 0);

    assert!(platform.timer().wrap());
    assert_eq!(smart.wrap_count(), 1);
    assert_eq!(filter.completions(), 1);
    assert_eq!(platform.line().spurious(), 0);
}

fn recorded_bulk(
    mode: SimCompletion,
) -> (TransferSession, Arc<RecordingBlock<SimAxiDma>>, SimAxiDma) {
    let line = SharedIrqLine::new(0);
    let dma = SimAxiDma::new(mode, line.clone());
    let rec = Arc::new(RecordingBlock::new(dma.clone()));
    let regs = Registers::new(rec.clone());
    let mut signal = BulkStrategy::completion_signal(regs.clone()).expect("signal");
    signal.attach(&line);
    let session = TransferSession::bulk(regs, signal, SessionConfig::default().with_max_elements(64))
        .expect("session");
    (session, rec, dma)
}

#[test]
fn test_dma_completion_acked_once_from_interrupt() {
    let (session, rec, _dma) = recorded_bulk(SimCompletion::Immediate);
    rec.take();

    session.submit_input(&[2, 3]).expect("submit");
    session.start().expect("start");
    let mut out = [0i32; 2];
    session.read(&mut out).expect("collect");
    assert_eq!(out, [4, 9]);

    let log = rec.take();
    assert_eq!(writes_to(&log, axi_dma::S2MM_DMASR), vec![axi_dma::dmasr::IOC_IRQ]);

    // The ack directly follows the status read that observed the bit
    let ack = log
        .iter()
        .position(|a| *a == Access::Write(axi_dma::S2MM_DMASR, axi_dma::dmasr::IOC_IRQ))
        .expect("ack");
    assert!(matches!(
        log[ack - 1],
        Access::Read(axi_dma::S2MM_DMASR, s) if s & axi_dma::dmasr::IOC_IRQ != 0
    ));
}

#[test]
fn test_dma_lengths_written_last() {
    let (session, rec, _dma) = recorded_bulk(SimCompletion::Manual);
    session.submit_input(&[1; 10]).expect("submit");
    rec.take();
    session.start().expect("start");

    let writes: Vec<usize> = rec
        .take()
        .into_iter()
        .filter_map(|a| match a {
            Access::Write(o, _) => Some(o),
            Access::Read(..) => None,
        })
        .collect();
    let mm2s_len = writes.iter().position(|&o| o == axi_dma::MM2S_LENGTH).expect("MM2S_LENGTH");
    let s2mm_len = writes.iter().position(|&o| o == axi_dma::S2MM_LENGTH).expect("S2MM_LENGTH");
    let sa = writes.iter().position(|&o| o == axi_dma::MM2S_SA).expect("SA");
    let da = writes.iter().position(|&o| o == axi_dma::S2MM_DA).expect("DA");
    assert!(sa < mm2s_len && da < s2mm_len);
    assert_eq!(s2mm_len, writes.len() - 1, "S2MM_LENGTH arms the transfer");
}

#[test]
fn test_timeout_never_acknowledges() {
    let (session, rec, dma) = recorded_bulk(SimCompletion::Manual);
    session.submit_input(&[1, 2]).expect("submit");
    session.start().expect("start");
    rec.take();

    let mut out = [0i32; 2];
    assert!(session.collect(&mut out, Duration::from_millis(20)).is_err());
    let log = rec.take();
    assert!(writes_to(&log, axi_dma::S2MM_DMASR).is_empty());
    assert!(!dma.is_busy());
}
