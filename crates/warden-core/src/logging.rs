use tracing_subscriber::EnvFilter;

/// Instala o subscriber `fmt` global.
///
/// `RUST_LOG` tem precedência sobre `default_filter`. Chamadas repetidas são
/// ignoradas, então binários e exemplos podem chamar sem coordenação.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
