//! Mapping of free-text category suggestions onto the fixed system categories.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SystemCategory {
    Electronics,
    Furniture,
    Clothing,
    Books,
    Sports,
    Vehicles,
    RealEstate,
    Services,
    #[serde(other)]
    Other,
}

impl SystemCategory {
    pub const ALL: [SystemCategory; 9] = [
        SystemCategory::Electronics,
        SystemCategory::Furniture,
        SystemCategory::Clothing,
        SystemCategory::Books,
        SystemCategory::Sports,
        SystemCategory::Vehicles,
        SystemCategory::RealEstate,
        SystemCategory::Services,
        SystemCategory::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SystemCategory::Electronics => "electronics",
            SystemCategory::Furniture => "furniture",
            SystemCategory::Clothing => "clothing",
            SystemCategory::Books => "books",
            SystemCategory::Sports => "sports",
            SystemCategory::Vehicles => "vehicles",
            SystemCategory::RealEstate => "real_estate",
            SystemCategory::Services => "services",
            SystemCategory::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
    }
}

impl fmt::Display for SystemCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct KeywordGroup {
    keywords: &'static [&'static str],
    category: SystemCategory,
}

// Order matters: the first group with a matching keyword wins.
const KEYWORD_GROUPS: &[KeywordGroup] = &[
    KeywordGroup {
        keywords: &[
            "electronic", "phone", "mobile", "computer", "laptop", "tablet", "camera",
            "television", "audio", "headphone", "console", "gaming", "celular",
            "teléfono", "computadora", "electrónic", "电子", "手机", "电脑", "数码",
        ],
        category: SystemCategory::Electronics,
    },
    KeywordGroup {
        keywords: &[
            "furniture", "sofa", "couch", "chair", "desk", "wardrobe", "cabinet", "shelf",
            "mattress", "mueble", "silla", "家具", "沙发",
        ],
        category: SystemCategory::Furniture,
    },
    KeywordGroup {
        keywords: &[
            "cloth", "fashion", "apparel", "shoe", "sneaker", "dress", "shirt", "jacket",
            "handbag", "jewel", "ropa", "moda", "zapato", "服装", "衣", "鞋",
        ],
        category: SystemCategory::Clothing,
    },
    KeywordGroup {
        keywords: &[
            "book", "magazine", "comic", "novel", "libro", "revista", "书", "杂志",
        ],
        category: SystemCategory::Books,
    },
    KeywordGroup {
        keywords: &[
            "sport", "fitness", "bicycle", "bike", "gym", "outdoor", "camping", "deporte",
            "bicicleta", "运动", "健身",
        ],
        category: SystemCategory::Sports,
    },
    KeywordGroup {
        keywords: &[
            "vehicle", "automobile", "motorcycle", "motorbike", "truck", "scooter",
            "coche", "vehículo", "moto", "汽车", "摩托", "车辆",
        ],
        category: SystemCategory::Vehicles,
    },
    KeywordGroup {
        keywords: &[
            "real estate", "property", "apartment", "condo", "housing", "inmueble",
            "departamento", "terreno", "房产", "房屋", "公寓",
        ],
        category: SystemCategory::RealEstate,
    },
    KeywordGroup {
        keywords: &[
            "service", "repair", "cleaning", "tutor", "lesson", "servicio", "clase",
            "服务", "维修",
        ],
        category: SystemCategory::Services,
    },
    KeywordGroup {
        keywords: &[
            "food", "drink", "snack", "grocery", "comida", "bebida", "食品", "饮料",
        ],
        category: SystemCategory::Other,
    },
    KeywordGroup {
        keywords: &[
            "collect", "antique", "artwork", "coin", "stamp", "colección", "antigüedad",
            "收藏", "古董",
        ],
        category: SystemCategory::Other,
    },
    KeywordGroup {
        keywords: &[
            "home", "garden", "kitchen", "decor", "household", "hogar", "jardín", "cocina",
            "家居", "厨房", "花园",
        ],
        category: SystemCategory::Furniture,
    },
];

/**
 * classify
 * 把 AI 给出的自由文本分类映射到系统固定分类：空 → other；精确匹配直接返回；
 * 否则按关键字表顺序做子串匹配，第一个命中的分组胜出。
 */
pub fn classify(suggested: Option<&str>) -> SystemCategory {
    let input = match suggested.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_lowercase(),
        _ => return SystemCategory::Other,
    };

    if let Some(category) = SystemCategory::parse(&input) {
        return category;
    }

    KEYWORD_GROUPS
        .iter()
        .find(|group| group.keywords.iter().any(|kw| input.contains(kw)))
        .map(|group| group.category)
        .unwrap_or(SystemCategory::Other)
}
