//! # Runtime Benchmark
//!
//! Measures one host-driven main tick over worlds of increasing size:
//! a system on the `main` thread walks a dynamic list and writes every
//! tracked component.
//!
//! Run with: `cargo bench --package cadence`

#![allow(missing_docs)]
#![allow(dead_code)]

use cadence::ecs::{
    Component, ComponentData, ComponentHandle, ComponentType, EcsResult, EntityDynamicList,
    System, SystemContext,
};
use cadence::threads::MAIN_THREAD;
use cadence::{Runtime, RuntimeConfig};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

#[derive(Clone, Default)]
struct Energy(f32);

impl ComponentData for Energy {}

struct Drain {
    list: Option<EntityDynamicList>,
}

impl System for Drain {
    fn thread(&self) -> &str {
        MAIN_THREAD
    }

    fn initialize(&mut self, ctx: &SystemContext) -> EcsResult<()> {
        self.list = Some(ctx.dynamic_list(&[ComponentType::of::<Energy>()])?);
        Ok(())
    }

    fn update(&mut self, ctx: &SystemContext, dt: f64) -> EcsResult<()> {
        if let Some(list) = &self.list {
            for handler in list.iter() {
                if let Some(energy) = handler.get_component::<Energy>() {
                    #[allow(clippy::cast_possible_truncation)]
                    energy.write(ctx.token(), |e| e.0 -= dt as f32)?;
                }
            }
        }
        Ok(())
    }
}

fn bench_main_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("main_tick");
    for count in [100_usize, 1_000, 10_000] {
        let runtime = Runtime::new(RuntimeConfig::default())
            .unwrap_or_else(|e| panic!("runtime: {e}"));
        let world = runtime.main_world();
        for _ in 0..count {
            let _ = world.create_entity([Component::new(Energy(1_000.0)) as ComponentHandle]);
        }
        let _ = world.systems().add_system(Drain { list: None });

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| runtime.tick_main(0.016));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_main_tick);
criterion_main!(benches);
