use serde::Deserialize;

/// Recognised configuration for a [`crate::Relocaliser`] (§6).
///
/// Every field has a default matching `spec.md` §6 exactly; a TOML document
/// passed via `--config` only needs to override the fields it cares about,
/// since the type derives [`Deserialize`] with `#[serde(default)]` on every
/// field via [`RelocaliserConfig::default`].
///
/// # Examples
///
/// ```
/// use scoreforest_reloc::config::RelocaliserConfig;
///
/// let config = RelocaliserConfig::default();
/// assert_eq!(config.m_max, 1024);
/// assert_eq!(config.b, 500);
/// assert_eq!(config.rng_seed, 42);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelocaliserConfig {
    /// Initial candidate pool size.
    #[serde(rename = "M_max")]
    pub m_max: usize,
    /// Inlier batch growth per round.
    #[serde(rename = "B")]
    pub b: usize,
    /// Maximum modes retained per merged prediction.
    #[serde(rename = "K")]
    pub k: usize,
    /// Maximum modes considered per leaf before merging.
    #[serde(rename = "K_in")]
    pub k_in: usize,
    /// Greedy-merge radius, in metres.
    pub r_merge: f64,
    /// Minimum pairwise scene-space separation for a candidate triple, metres.
    pub d_min: f64,
    /// Rigid-transform consistency tolerance, metres.
    pub tau_t: f64,
    /// If true, sample uniformly among a keypoint's modes; otherwise always
    /// take the highest-weight mode.
    pub use_all_modes: bool,
    pub check_min_distance: bool,
    pub check_rigid_transform: bool,
    /// Hard cap on halving rounds; also the frame timeout bound (§5).
    pub max_rounds: usize,
    pub lm_max_iters: usize,
    pub lm_tol_rel: f64,
    pub rng_seed: u64,
    /// Per-slot retry budget for the candidate generator (§4.C).
    pub generator_retry_budget: usize,
    /// `0` selects the sequential dispatch backend; otherwise sizes a rayon
    /// thread pool. Ambient addition, not part of `spec.md` §6's named keys.
    pub thread_pool_size: usize,
    /// Ambient addition: level passed through to `env_logger` by the CLI.
    pub log_level: String,
}

impl Default for RelocaliserConfig {
    fn default() -> Self {
        let m_max = 1024;
        RelocaliserConfig {
            m_max,
            b: 500,
            k: 10,
            k_in: 50,
            r_merge: 0.005,
            d_min: 0.3,
            tau_t: 0.05,
            use_all_modes: true,
            check_min_distance: true,
            check_rigid_transform: true,
            max_rounds: (m_max as f64).log2().ceil() as usize + 1,
            lm_max_iters: 10,
            lm_tol_rel: 1e-4,
            rng_seed: 42,
            generator_retry_budget: 1000,
            thread_pool_size: num_cpus::get(),
            log_level: "info".to_string(),
        }
    }
}

impl RelocaliserConfig {
    /// Parse configuration overrides from a TOML document, falling back to
    /// `spec.md` §6 defaults for any key not present.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Inlier-arena capacity implied by this configuration: `I_max =
    /// maxRounds * B` (§5), plus the initial unmasked draw.
    pub fn inlier_capacity(&self) -> usize {
        self.b * (self.max_rounds + 1)
    }
}
