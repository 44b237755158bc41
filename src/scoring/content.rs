use crate::config::{CategoriesConfig, ScoringConfig};
use crate::poi::PoiData;

use super::details::ScoreLog;

/// Content-quality multiplier: article length, site links, category weight,
/// MSFS overlap, and the global boost factor. Each factor is multiplicative
/// and logged individually.
pub fn content_multiplier(
    config: &ScoringConfig,
    categories: &CategoriesConfig,
    data: &PoiData,
    boost_factor: f64,
    log: &mut ScoreLog,
) -> f64 {
    let mut multiplier = 1.0;

    multiplier *= article_multiplier(config, categories, data, log);

    if data.sitelinks >= 1 {
        let m = 1.0 + ((data.sitelinks - 1) as f64).sqrt();
        log.factor("Sitelinks", &data.sitelinks.to_string(), m);
        multiplier *= m;
    }

    let weight = categories.weight(&data.category);
    if weight != 1.0 {
        log.factor("Category weight", &data.category, weight);
        multiplier *= weight;
    }

    if data.is_msfs_poi {
        log.factor("MSFS POI", "", 4.0);
        multiplier *= 4.0;
    }

    if boost_factor != 1.0 {
        log.factor("Boost", "", boost_factor);
        multiplier *= boost_factor;
    }

    multiplier
}

/// Square-root article-length law. Pregrounded categories get a fixed
/// virtual boost added inside the sqrt; the log shows `length+boost chars`.
fn article_multiplier(
    config: &ScoringConfig,
    categories: &CategoriesConfig,
    data: &PoiData,
    log: &mut ScoreLog,
) -> f64 {
    let pregrounded = config.pregrounding_enabled && categories.pregrounded(&data.category);
    let effective = if pregrounded {
        data.article_length + config.pregrounding_boost_chars
    } else {
        data.article_length
    };

    if effective <= 1000 {
        return 1.0;
    }

    let m = (effective as f64 / 1000.0)
        .sqrt()
        .min(config.article_length_ceiling);
    let detail = if pregrounded {
        format!("{}+{} chars", data.article_length, config.pregrounding_boost_chars)
    } else {
        format!("{} chars", data.article_length)
    };
    log.factor("Article", &detail, m);
    m
}

/// Whether the stub badge applies: short article and not rescued by
/// pregrounding.
pub fn is_stub(config: &ScoringConfig, categories: &CategoriesConfig, data: &PoiData) -> bool {
    data.article_length < config.stub_chars
        && !(config.pregrounding_enabled && categories.pregrounded(&data.category))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ScoringConfig {
        ScoringConfig::default()
    }

    fn data(category: &str, article_length: u32, sitelinks: u32) -> PoiData {
        PoiData {
            category: category.to_string(),
            article_length,
            sitelinks,
            ..Default::default()
        }
    }

    fn pregrounding_categories() -> CategoriesConfig {
        toml::from_str(
            r#"
            [categories.lighthouse]
            preground = true
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_short_article_is_neutral() {
        let mut log = ScoreLog::new();
        let m = content_multiplier(
            &config(),
            &CategoriesConfig::default(),
            &data("castle", 800, 0),
            1.0,
            &mut log,
        );
        assert_eq!(m, 1.0);
    }

    #[test]
    fn test_article_sqrt_law() {
        let mut log = ScoreLog::new();
        let m = content_multiplier(
            &config(),
            &CategoriesConfig::default(),
            &data("castle", 4000, 0),
            1.0,
            &mut log,
        );
        assert!((m - 2.0).abs() < 1e-9, "sqrt(4000/1000) = 2, got {}", m);
    }

    #[test]
    fn test_article_ceiling_clamps() {
        let mut log = ScoreLog::new();
        let m = content_multiplier(
            &config(),
            &CategoriesConfig::default(),
            &data("castle", 10_000_000, 0),
            1.0,
            &mut log,
        );
        assert_eq!(m, config().article_length_ceiling);
    }

    #[test]
    fn test_pregrounding_boost_inside_sqrt() {
        let categories = pregrounding_categories();
        let mut log = ScoreLog::new();
        // 500 chars alone would be neutral; +4000 inside the sqrt is not
        let m = content_multiplier(&config(), &categories, &data("lighthouse", 500, 0), 1.0, &mut log);
        let expected = (4500.0f64 / 1000.0).sqrt();
        assert!((m - expected).abs() < 1e-9, "got {}", m);
        assert!(
            log.finish().contains("500+4000 chars"),
            "log must show the virtual boost"
        );
    }

    #[test]
    fn test_pregrounding_disabled_globally() {
        let categories = pregrounding_categories();
        let cfg = ScoringConfig {
            pregrounding_enabled: false,
            ..ScoringConfig::default()
        };
        let mut log = ScoreLog::new();
        let m = content_multiplier(&cfg, &categories, &data("lighthouse", 500, 0), 1.0, &mut log);
        assert_eq!(m, 1.0);
    }

    #[test]
    fn test_sitelinks_law() {
        let mut log = ScoreLog::new();
        let m = content_multiplier(
            &config(),
            &CategoriesConfig::default(),
            &data("castle", 0, 10),
            1.0,
            &mut log,
        );
        assert!((m - 4.0).abs() < 1e-9, "1 + sqrt(9) = 4, got {}", m);

        // A single sitelink is neutral
        let mut log = ScoreLog::new();
        let m = content_multiplier(
            &config(),
            &CategoriesConfig::default(),
            &data("castle", 0, 1),
            1.0,
            &mut log,
        );
        assert_eq!(m, 1.0);
    }

    #[test]
    fn test_msfs_and_boost_factors() {
        let mut log = ScoreLog::new();
        let mut d = data("castle", 0, 0);
        d.is_msfs_poi = true;
        let m = content_multiplier(&config(), &CategoriesConfig::default(), &d, 2.0, &mut log);
        assert!((m - 8.0).abs() < 1e-9, "4.0 x 2.0, got {}", m);
    }

    #[test]
    fn test_stub_detection_respects_pregrounding() {
        let cfg = config();
        let categories = pregrounding_categories();
        assert!(is_stub(&cfg, &categories, &data("castle", 500, 0)));
        assert!(!is_stub(&cfg, &categories, &data("castle", 5000, 0)));
        // Pregrounded category is never a stub while pregrounding is on
        assert!(!is_stub(&cfg, &categories, &data("lighthouse", 500, 0)));
    }
}
