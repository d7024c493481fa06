//! Purchase packages: minute bundles priced in Telegram Stars

/// A purchasable minute bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Package {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    /// Invoice payload echoed back in successful_payment
    pub payload: &'static str,
    pub stars_amount: i64,
    pub minutes: i64,
    /// Per-user purchase cap; 0 means unlimited
    pub purchase_limit: u32,
}

/// All packages, ordered by size
pub const PACKAGES: &[Package] = &[
    Package {
        id: "micro_10",
        title: "Промо-пакет 'Микро'",
        description: "10 минут транскрибации",
        payload: "buy_micro_10",
        stars_amount: 5,
        minutes: 10,
        purchase_limit: 3,
    },
    Package {
        id: "start_50",
        title: "Пакет 'Старт'",
        description: "50 минут транскрибации",
        payload: "buy_start_50",
        stars_amount: 35,
        minutes: 50,
        purchase_limit: 0,
    },
    Package {
        id: "standard_200",
        title: "Пакет 'Стандарт'",
        description: "200 минут транскрибации",
        payload: "buy_standard_200",
        stars_amount: 119,
        minutes: 200,
        purchase_limit: 0,
    },
    Package {
        id: "profi_1000",
        title: "Пакет 'Профи'",
        description: "1000 минут транскрибации",
        payload: "buy_profi_1000",
        stars_amount: 549,
        minutes: 1000,
        purchase_limit: 0,
    },
    Package {
        id: "editorial_3000",
        title: "Пакет 'Редакция'",
        description: "3000 минут транскрибации для редакций",
        payload: "buy_editorial_3000",
        stars_amount: 1399,
        minutes: 3000,
        purchase_limit: 0,
    },
    Package {
        id: "max_8888",
        title: "Пакет 'MAX'",
        description: "8888 минут транскрибации",
        payload: "buy_max_8888",
        stars_amount: 4444,
        minutes: 8888,
        purchase_limit: 0,
    },
];

/// Smallest package covering the given minute deficit
pub fn recommend_for_deficit(deficit: i64) -> Option<&'static Package> {
    PACKAGES.iter().find(|p| p.minutes >= deficit)
}

/// Look up a package by its invoice payload
pub fn by_payload(payload: &str) -> Option<&'static Package> {
    PACKAGES.iter().find(|p| p.payload == payload)
}
