/*!
 * Warden Traits
 *
 * Traits comuns usados em toda a workspace Warden
 */

/// Componente capaz de liberar memória quando o processo está sob pressão.
///
/// É a contrapartida de uma requisição forçada de coleta de lixo: depois de uma
/// limpeza emergencial, o gerenciador pede a cada `Reclaimable` registrado que
/// devolva o que puder.
pub trait Reclaimable: Send + Sync {
    /// Nome usado nos logs
    fn name(&self) -> &str;

    /// Libera memória e retorna quantos itens foram descartados
    fn reclaim(&self) -> usize;
}

/// Fonte de leitura da memória residente do processo
pub trait MemoryProbe: Send + Sync {
    /// Memória residente atual, em megabytes
    fn resident_mb(&self) -> f64;
}
