// Internationalization module for backend error messages and responses

use actix_web::HttpRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Zh,
    En,
    Es,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Zh, Language::En, Language::Es];

    pub fn code(self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
            Language::Es => "es",
        }
    }

    pub fn english_name(self) -> &'static str {
        match self {
            Language::Zh => "Chinese",
            Language::En => "English",
            Language::Es => "Spanish",
        }
    }

    /**
     * from_code
     * 按语言标签的主子标签解析（zh-CN → zh），不认识的返回 None。
     */
    pub fn from_code(raw: &str) -> Option<Self> {
        let primary = raw
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "zh" => Some(Language::Zh),
            "en" => Some(Language::En),
            "es" => Some(Language::Es),
            _ => None,
        }
    }

    /**
     * resolve
     * 接受语言代码或英文语言名（前缀匹配，如 "Chinese (Simplified)" → zh）。
     */
    pub fn resolve(raw: &str) -> Option<Self> {
        if let Some(lang) = Self::from_code(raw) {
            return Some(lang);
        }
        let lower = raw.trim().to_lowercase();
        Self::ALL.into_iter().find(|lang| {
            lower.starts_with(&lang.english_name().to_ascii_lowercase())
                || lower.starts_with(lang.native_name())
        })
    }

    fn native_name(self) -> &'static str {
        match self {
            Language::Zh => "中文",
            Language::En => "english",
            Language::Es => "español",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/**
 * resolve_language
 * 从请求头提取语言：优先 X-Language，其次 Accept-Language 的第一个标签，默认 es。
 */
pub fn resolve_language(req: &HttpRequest) -> Language {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(|v| v.to_string())
    };

    if let Some(lang) = header("X-Language").as_deref().and_then(Language::from_code) {
        return lang;
    }

    header("Accept-Language")
        .as_deref()
        .and_then(|v| v.split(',').next())
        .and_then(|tag| tag.split(';').next())
        .and_then(Language::from_code)
        .unwrap_or(Language::Es)
}

pub struct I18n {
    messages: HashMap<Language, HashMap<&'static str, &'static str>>,
}

const EN: &[(&str, &str)] = &[
    ("product_created", "Listing submitted successfully, pending review"),
    ("product_updated", "Listing updated successfully"),
    ("product_deleted", "Listing deleted successfully"),
    ("product_reviewed", "Listing review saved"),
    ("product_not_found", "Listing not found"),
    ("product_not_available", "This listing is not available for purchase"),
    ("order_created", "Order created successfully"),
    ("order_updated", "Order updated successfully"),
    ("order_not_found", "Order not found"),
    ("conversation_not_found", "Conversation not found"),
    ("cannot_buy_own_product", "You cannot buy your own listing"),
    ("cannot_message_yourself", "You cannot start a conversation with yourself"),
    ("invalid_order_transition", "This action is not allowed in the current order status"),
    ("meetup_only", "Only meetup orders can arrange a meeting"),
    ("shipping_only", "Only shipping orders can be shipped"),
    ("shipping_address_required", "A shipping address is required"),
    ("reason_required", "Please provide a reason"),
    ("invalid_title", "Title must be between 1 and 120 characters"),
    ("invalid_description", "Description is too long"),
    ("invalid_price", "Price must be a valid positive amount"),
    ("invalid_image", "The image could not be read"),
    ("invalid_language", "Unsupported language"),
    ("invalid_category", "Unknown category"),
    ("invalid_message", "Message cannot be empty"),
    ("invalid_signature", "Invalid signature"),
    ("validation_error", "Please check your input"),
    ("payload_too_large", "The request is too large"),
    ("unauthorized", "Please sign in first"),
    ("forbidden", "You do not have permission to perform this action"),
    ("service_not_configured", "This service is not configured"),
    ("ai_unavailable", "The AI assistant is temporarily unavailable"),
    ("server_error", "An error occurred on the server"),
];

const ZH: &[(&str, &str)] = &[
    ("product_created", "商品提交成功，等待审核"),
    ("product_updated", "商品更新成功"),
    ("product_deleted", "商品删除成功"),
    ("product_reviewed", "审核结果已保存"),
    ("product_not_found", "未找到商品"),
    ("product_not_available", "该商品当前无法购买"),
    ("order_created", "订单创建成功"),
    ("order_updated", "订单更新成功"),
    ("order_not_found", "未找到订单"),
    ("conversation_not_found", "未找到会话"),
    ("cannot_buy_own_product", "不能购买自己发布的商品"),
    ("cannot_message_yourself", "不能和自己发起会话"),
    ("invalid_order_transition", "当前订单状态不允许该操作"),
    ("meetup_only", "只有面交订单可以约定见面"),
    ("shipping_only", "只有快递订单可以发货"),
    ("shipping_address_required", "请填写收货地址"),
    ("reason_required", "请填写原因"),
    ("invalid_title", "标题长度需在 1 到 120 个字符之间"),
    ("invalid_description", "描述过长"),
    ("invalid_price", "请输入有效的价格"),
    ("invalid_image", "无法读取图片"),
    ("invalid_language", "不支持的语言"),
    ("invalid_category", "未知的分类"),
    ("invalid_message", "消息不能为空"),
    ("invalid_signature", "签名无效"),
    ("validation_error", "请检查你的输入"),
    ("payload_too_large", "请求内容过大"),
    ("unauthorized", "请先登录"),
    ("forbidden", "你没有权限执行该操作"),
    ("service_not_configured", "该服务尚未配置"),
    ("ai_unavailable", "AI 助手暂时不可用"),
    ("server_error", "服务器发生错误"),
];

const ES: &[(&str, &str)] = &[
    ("product_created", "Anuncio enviado correctamente, pendiente de revisión"),
    ("product_updated", "Anuncio actualizado correctamente"),
    ("product_deleted", "Anuncio eliminado correctamente"),
    ("product_reviewed", "Revisión guardada"),
    ("product_not_found", "Anuncio no encontrado"),
    ("product_not_available", "Este anuncio no está disponible para compra"),
    ("order_created", "Pedido creado correctamente"),
    ("order_updated", "Pedido actualizado correctamente"),
    ("order_not_found", "Pedido no encontrado"),
    ("conversation_not_found", "Conversación no encontrada"),
    ("cannot_buy_own_product", "No puedes comprar tu propio anuncio"),
    ("cannot_message_yourself", "No puedes iniciar una conversación contigo mismo"),
    ("invalid_order_transition", "Esta acción no está permitida en el estado actual del pedido"),
    ("meetup_only", "Solo los pedidos con entrega en persona pueden acordar un encuentro"),
    ("shipping_only", "Solo los pedidos con envío pueden enviarse"),
    ("shipping_address_required", "Se requiere una dirección de envío"),
    ("reason_required", "Indica un motivo"),
    ("invalid_title", "El título debe tener entre 1 y 120 caracteres"),
    ("invalid_description", "La descripción es demasiado larga"),
    ("invalid_price", "El precio debe ser un importe válido"),
    ("invalid_image", "No se pudo leer la imagen"),
    ("invalid_language", "Idioma no soportado"),
    ("invalid_category", "Categoría desconocida"),
    ("invalid_message", "El mensaje no puede estar vacío"),
    ("invalid_signature", "Firma no válida"),
    ("validation_error", "Revisa los datos introducidos"),
    ("payload_too_large", "La solicitud es demasiado grande"),
    ("unauthorized", "Inicia sesión primero"),
    ("forbidden", "No tienes permiso para realizar esta acción"),
    ("service_not_configured", "Este servicio no está configurado"),
    ("ai_unavailable", "El asistente de IA no está disponible temporalmente"),
    ("server_error", "Se produjo un error en el servidor"),
];

impl I18n {
    pub fn new() -> Self {
        let mut messages = HashMap::new();
        messages.insert(Language::En, EN.iter().copied().collect());
        messages.insert(Language::Zh, ZH.iter().copied().collect());
        messages.insert(Language::Es, ES.iter().copied().collect());
        Self { messages }
    }

    /// Process-wide catalog; the tables are static so one instance is enough.
    pub fn shared() -> &'static I18n {
        static CATALOG: OnceLock<I18n> = OnceLock::new();
        CATALOG.get_or_init(I18n::new)
    }

    pub fn get(&self, lang: Language, key: &str) -> String {
        self.messages
            .get(&lang)
            .and_then(|msgs| msgs.get(key))
            .or_else(|| {
                self.messages
                    .get(&Language::En)
                    .and_then(|msgs| msgs.get(key))
            })
            .map(|s| s.to_string())
            .unwrap_or_else(|| key.to_string())
    }
}

impl Default for I18n {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for `I18n::shared().get(lang, key)`.
pub fn t(lang: Language, key: &str) -> String {
    I18n::shared().get(lang, key)
}
