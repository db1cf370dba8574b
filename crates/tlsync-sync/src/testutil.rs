use chrono::NaiveDate;
use tlsync_core::countries::reference_countries;
use tlsync_core::{CategoryId, CountryId, NewCategory, NewUrl, SnapshotRow};
use tlsync_storage::{MemoryStore, UrlStore};

pub const LEGEND: &str = "CATEGORY_DESCRIPTION,CATEGORY_CODE,OLD_CATEGORY_CODES,DESCRIPTION\n\
News Media,NEWS,,Major news outlets\n\
Human Rights Issues,HUMR,,\n\
Gambling,GMB,GAMB,Online gambling\n";

pub const LEGEND_PATH: &str = "lists/00-LEGEND-new_category_codes.csv";

pub struct Ids {
    pub news: CategoryId,
    pub humr: CategoryId,
    pub us: CountryId,
    pub global: CountryId,
}

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2017, 4, 12).unwrap()
}

pub fn row(line: usize, url: &str, code: &str) -> SnapshotRow {
    SnapshotRow {
        line,
        url: url.into(),
        category_code: code.into(),
        date_added: date(),
        source: String::new(),
        notes: String::new(),
    }
}

pub fn url_row(url: &str, category_id: CategoryId, country_id: CountryId) -> NewUrl {
    NewUrl {
        url: url.into(),
        category_id,
        country_id,
        date_added: date(),
        source: String::new(),
        notes: String::new(),
    }
}

/// A list file with the standard header; each entry is `(url, category_code)`.
pub fn list_file(entries: &[(&str, &str)]) -> String {
    let mut text = String::from("url,category_code,category_description,date_added,source,notes\n");
    for (url, code) in entries {
        text.push_str(&format!("{url},{code},,2017-04-12,,\n"));
    }
    text
}

/// Store holding the reference countries plus the NEWS and HUMR categories.
pub async fn seeded_store() -> (MemoryStore, Ids) {
    let store = MemoryStore::new();
    store
        .insert_categories(&[category("NEWS"), category("HUMR")])
        .await
        .unwrap();
    store.insert_countries(&reference_countries()).await.unwrap();
    let categories = store.categories().await.unwrap();
    let countries = store.countries().await.unwrap();
    let category_id = |code: &str| categories.iter().find(|c| c.code == code).unwrap().id;
    let country_id = |code: &str| countries.iter().find(|c| c.alpha_2 == code).unwrap().id;
    let ids = Ids {
        news: category_id("NEWS"),
        humr: category_id("HUMR"),
        us: country_id("US"),
        global: country_id("XX"),
    };
    (store, ids)
}

fn category(code: &str) -> NewCategory {
    NewCategory {
        code: code.into(),
        description: code.into(),
        long_description: None,
        old_codes: Vec::new(),
    }
}
