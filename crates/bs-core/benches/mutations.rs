//! Mutation path benchmarks: the no-match fast path and a coalesced pass.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use bs_core::{ArenaHost, Document, Driver, MonitorEvent, MutationRecord, Settings};

fn feed_page(doc: &mut Document, items: usize, with_video: bool) -> Vec<MutationRecord<bs_core::NodeId>> {
    let body = doc.body_id().expect("body");
    for i in 0..items {
        let card = doc.element("article", &[("class", "card")]);
        let title = doc.create_element("h2");
        let text = doc.create_text("headline");
        let inner = if with_video && i % 10 == 0 {
            doc.create_element("video")
        } else {
            doc.element("p", &[("class", "summary")])
        };
        doc.append_child(title, text);
        doc.append_child(card, title);
        doc.append_child(card, inner);
        doc.append_child(body, card);
    }
    doc.take_records()
}

fn running_driver() -> Driver<Document, ArenaHost> {
    let mut driver = Driver::for_document(Document::with_body(), ArenaHost::new(), Some("example.com"));
    driver.dispatch(MonitorEvent::Configure(Settings::install_defaults()));
    driver.dispatch(MonitorEvent::Start);
    driver
}

fn bench_no_match(c: &mut Criterion) {
    c.bench_function("batch_without_media_200", |b| {
        b.iter_batched(
            || {
                let mut driver = running_driver();
                let batch = feed_page(driver.tree_mut(), 200, false);
                (driver, batch)
            },
            |(mut driver, batch)| {
                driver.dispatch(MonitorEvent::Mutations(black_box(batch)));
                driver
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_coalesced_pass(c: &mut Criterion) {
    c.bench_function("coalesced_pass_200", |b| {
        b.iter_batched(
            || {
                let mut driver = running_driver();
                let batch = feed_page(driver.tree_mut(), 200, true);
                driver.dispatch(MonitorEvent::Mutations(batch));
                driver
            },
            |mut driver| {
                driver.fire_timers();
                driver
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_no_match, bench_coalesced_pass);
criterion_main!(benches);
