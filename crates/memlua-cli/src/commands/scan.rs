//! `memlua scan` - first scan plus refining next scans over a file image

use std::path::Path;

use memlua_core::scan::{ScanType, ValueType};
use memlua_core::{MatchSet, ScanEvent, ScanSession};

use crate::app::GlobalOpts;

pub struct ScanOptions<'a> {
    pub value: &'a str,
    pub value2: Option<&'a str>,
    pub value_type: ValueType,
    pub scan_type: ScanType,
    pub next: &'a [String],
    pub base: u64,
    pub hex: bool,
}

pub fn run(file: &Path, opts: &ScanOptions<'_>, global: &GlobalOpts) -> anyhow::Result<()> {
    let config = super::load_config(global)?;
    let (bridge, _target) = super::attach(file, opts.base, None, &config)?;

    let mut first = config.scan.configuration();
    first.value = opts.value.to_string();
    first.value2 = opts.value2.unwrap_or_default().to_string();
    first.value_type = opts.value_type;
    first.scan_type = opts.scan_type;
    first.is_hex = opts.hex;
    first.validate()?;

    let mut session = ScanSession::create(bridge)?;
    let events = session.subscribe();

    session.first_scan(&first)?;
    session.wait_for_completion()?;
    report_events(&events);
    let mut results = session.results()?;
    println!("first scan: {} result(s)", results.len());

    for (pass, value) in opts.next.iter().enumerate() {
        let mut next = first.clone();
        next.scan_type = ScanType::ExactValue;
        next.value = value.clone();
        next.value2 = String::new();
        session.next_scan(&next)?;
        session.wait_for_completion()?;
        report_events(&events);
        results = session.results()?;
        println!("next scan {}: {} result(s)", pass + 1, results.len());
    }

    print_results(&results);
    session.dispose();
    Ok(())
}

fn report_events(events: &crossbeam::channel::Receiver<ScanEvent>) {
    for event in events.try_iter() {
        match event {
            ScanEvent::Progress(p) => log::debug!(
                "scanned {}/{} bytes, {} found ({:.0}%)",
                p.scanned,
                p.total,
                p.found,
                p.fraction() * 100.0
            ),
            ScanEvent::Completed => log::debug!("scan complete"),
        }
    }
}

fn print_results(results: &MatchSet) {
    for m in results {
        println!("0x{:X}", m);
    }
}
