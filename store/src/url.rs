use serde::Deserialize;

pub fn database_url_from_environment() -> String {
    #[derive(Debug, PartialEq, Deserialize)]
    struct DbConfig {
        database_url: String,
    }

    let provider = figment::providers::Env::raw();
    let db_config: DbConfig = figment::Figment::from(provider)
        .extract()
        .expect("DATABASE_URL environment variable missing or invalid");

    db_config.database_url
}
