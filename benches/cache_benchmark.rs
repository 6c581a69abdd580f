use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{seq::SliceRandom, thread_rng, Rng};
use std::sync::Arc;
use travel_content::{CacheConfig, ContentCache};

// Mixed hit/miss/invalidate load on the content cache from several tasks
pub fn cache_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("benchmark runtime");

    let mut group = c.benchmark_group("content_cache");

    for max_entries in [100usize, 1_000, 10_000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(max_entries),
            max_entries,
            |b, &max_entries| {
                b.iter(|| {
                    let cache = Arc::new(ContentCache::<Vec<u8>>::new(CacheConfig { max_entries }));

                    let slugs = (0..200).map(|i| format!("hotel-{}", i)).collect::<Vec<_>>();
                    let locales = ["en-US", "de-DE", "fr-FR", "pt-PT"];

                    runtime.block_on(async {
                        let mut handles = vec![];
                        for _ in 0..4 {
                            let cache = Arc::clone(&cache);
                            let slugs = slugs.clone();

                            handles.push(tokio::spawn(async move {
                                // ThreadRng is not Send, so draw every op up front
                                let ops = {
                                    let mut rng = thread_rng();
                                    let mut ops = Vec::with_capacity(250);
                                    for _ in 0..250 {
                                        let slug = slugs.choose(&mut rng).cloned().unwrap_or_default();
                                        let locale =
                                            locales.choose(&mut rng).copied().unwrap_or("en-US");
                                        ops.push((slug, locale, rng.gen_bool(0.02)));
                                    }
                                    ops
                                };

                                for (slug, locale, invalidate) in ops {
                                    if invalidate {
                                        // 2% invalidations
                                        cache.invalidate(&[format!("hotel:{}", slug)]);
                                        continue;
                                    }
                                    let key = format!("hotel:{}:{}", locale, slug);
                                    let tags = vec!["hotels".to_string(), format!("hotel:{}", slug)];
                                    let _ = cache
                                        .get_or_compute(&key, 300, &tags, || async {
                                            Ok(vec![0u8; 1024])
                                        })
                                        .await;
                                }
                            }));
                        }

                        for handle in handles {
                            let _ = handle.await;
                        }
                    });

                    black_box(cache.stats())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, cache_benchmark);
criterion_main!(benches);
