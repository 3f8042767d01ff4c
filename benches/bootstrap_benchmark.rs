// ========================================================================================
//
//                       Patient bootstrap throughput benchmark
//
// ========================================================================================
//
// Measures a full assisted/unaided bootstrap comparison for synthetic studies of
// increasing size, with a fixed number of lesions per patient so that patient
// aggregation cost is part of every iteration.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use readerstudy::bootstrap::BootstrapAnalyzer;
use readerstudy::config::BootstrapSettings;
use readerstudy::metrics::ReductionPolicy;
use readerstudy::types::ClassificationRecord;

/// Bootstrap iterations per measured run.
const N_ITERATIONS: usize = 200;
/// Records per patient.
const LESIONS_PER_PATIENT: usize = 3;
const PATIENT_COUNTS: [usize; 4] = [50, 200, 1000, 3000];

fn synthetic_reads(n_patients: usize, accuracy: f64, seed: u64) -> Vec<ClassificationRecord> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut records = Vec::with_capacity(n_patients * LESIONS_PER_PATIENT);
    for p in 0..n_patients {
        let ground_truth = rng.gen_bool(0.4);
        for _ in 0..LESIONS_PER_PATIENT {
            let correct = rng.gen_bool(accuracy);
            records.push(ClassificationRecord::new(
                format!("P{p:05}"),
                ground_truth,
                if correct { ground_truth } else { !ground_truth },
            ));
        }
    }
    records
}

fn benchmark_bootstrap_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("bootstrap_comparison");
    group.sample_size(10);

    for n_patients in PATIENT_COUNTS {
        let assisted = synthetic_reads(n_patients, 0.85, 1);
        let unaided = synthetic_reads(n_patients, 0.75, 2);
        group.throughput(Throughput::Elements((N_ITERATIONS * n_patients) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n_patients), &n_patients, |b, _| {
            b.iter(|| {
                let settings = BootstrapSettings {
                    n_iterations: N_ITERATIONS,
                    ..BootstrapSettings::default()
                };
                let mut engine = BootstrapAnalyzer::new(settings, ReductionPolicy::Max);
                black_box(engine.run_comparison(black_box(&assisted), black_box(&unaided)))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_bootstrap_comparison);
criterion_main!(benches);
