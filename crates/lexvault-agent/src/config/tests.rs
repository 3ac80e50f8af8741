#[cfg(test)]
mod tests {
    use super::super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.store.cap, 999);
        assert_eq!(config.store.root, "./data/corpus");
        assert_eq!(config.store.date_ranges.len(), 5);
        assert_eq!(config.quality.min_word_count, 1200);
        assert_eq!(config.mirror.backend, MirrorBackend::Lancedb);
        assert_eq!(config.credentials.tokens_env, "COURTLISTENER_API_KEYS");
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_default_backoff_matches_policy() {
        assert_eq!(BackoffConfig::default().policy(), BackoffPolicy::default());
    }

    #[test]
    fn test_sources_are_tagged_by_kind() {
        let config = Config::parse(
            r#"
            [[sources]]
            kind = "courtlistener"
            queries = ["fourth amendment"]
            max_pages = 2

            [[sources]]
            kind = "jsonl"
            path = "dumps/opinions.jsonl"
            "#,
        )
        .unwrap();

        assert_eq!(config.sources.len(), 2);
        match &config.sources[0] {
            SourceConfig::CourtListener(cl) => {
                assert_eq!(cl.queries, ["fourth amendment"]);
                assert_eq!(cl.max_pages, 2);
                assert_eq!(cl.cooldown_ms, 2000);
                assert!(cl.fetch_full_text);
                assert!(cl.opinion_url.ends_with("/api/rest/v4/opinions/"));
            }
            other => panic!("unexpected source {:?}", other),
        }
        assert_eq!(
            config.sources[1],
            SourceConfig::Jsonl { name: None, path: "dumps/opinions.jsonl".into() }
        );
    }

    #[test]
    fn test_ingestion_section_maps_to_coordinator_config() {
        let config = Config::parse(
            r#"
            [ingestion]
            target = 50
            batch_size = 10
            cooldown_ms = 250
            max_run_secs = 600
            "#,
        )
        .unwrap();

        let coordinator = config.ingestion.coordinator_config();
        assert_eq!(config.ingestion.target, 50);
        assert_eq!(coordinator.batch_size, 10);
        assert_eq!(coordinator.default_cooldown, Duration::from_millis(250));
        assert_eq!(coordinator.max_run_duration, Some(Duration::from_secs(600)));
        assert_eq!(coordinator.max_consecutive_upstream_failures, 5);
    }

    #[test]
    fn test_overlapping_date_ranges_are_rejected() {
        let config = Config::parse(
            r#"
            [store]
            date_ranges = [
                { label = "old", end = 2020 },
                { label = "new", start = 2019 },
            ]
            "#,
        )
        .unwrap();
        assert!(config.store.store_config().is_err());
    }

    #[test]
    fn test_custom_date_ranges_route_years() {
        let config = Config::parse(
            r#"
            [store]
            root = "/srv/corpus"
            cap = 500
            date_ranges = [
                { label = "pre-2020", end = 2019 },
                { label = "2020-on", start = 2020 },
            ]
            "#,
        )
        .unwrap();
        let store = config.store.store_config().unwrap();
        assert_eq!(store.cap, 500);
        assert_eq!(store.root, PathBuf::from("/srv/corpus"));
        assert_eq!(store.date_ranges.bucket_for(2012), "pre-2020");
        assert_eq!(store.date_ranges.bucket_for(2031), "2020-on");
    }

    #[test]
    fn test_unknown_mirror_backend_is_an_error() {
        assert!(Config::parse("[mirror]\nbackend = \"postgres\"").is_err());
    }

    #[test]
    fn test_tokens_are_split_and_trimmed() {
        let tokens = parse_tokens(" alpha, beta ,,gamma ");
        let exposed: Vec<&str> = tokens.iter().map(|t| t.expose_secret()).collect();
        assert_eq!(exposed, ["alpha", "beta", "gamma"]);
        assert!(parse_tokens("").is_empty());
    }

    #[test]
    fn test_missing_token_variable_yields_no_tokens() {
        let credentials = CredentialsConfig { tokens_env: "LEXVAULT_TEST_UNSET_TOKENS".into() };
        assert!(credentials.tokens().is_empty());
    }
}
