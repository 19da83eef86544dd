use actix_web::HttpResponse;
use serde::Serialize;
use serde_json::json;

/// Success envelope shared by every endpoint.
#[derive(Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(Envelope {
        success: true,
        message: None,
        data: Some(data),
    })
}

pub fn ok_with_message<T: Serialize>(message: &str, data: T) -> HttpResponse {
    HttpResponse::Ok().json(Envelope {
        success: true,
        message: Some(message.to_string()),
        data: Some(data),
    })
}

pub fn created<T: Serialize>(message: &str, data: T) -> HttpResponse {
    HttpResponse::Created().json(Envelope {
        success: true,
        message: Some(message.to_string()),
        data: Some(data),
    })
}

pub fn message(message: &str) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "message": message,
    }))
}

/// Paginated list payload.
#[derive(Serialize)]
pub struct Page<T: Serialize> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

/// Normalizes `page`/`per_page` query values and returns `(page, per_page, offset)`.
pub fn paging(page: Option<u32>, per_page: Option<u32>) -> (u32, u32, i64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page as i64 - 1) * per_page as i64;
    (page, per_page, offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_clamps_out_of_range_values() {
        assert_eq!(paging(None, None), (1, 20, 0));
        assert_eq!(paging(Some(0), Some(0)), (1, 1, 0));
        assert_eq!(paging(Some(3), Some(500)), (3, 100, 200));
    }

    #[test]
    fn envelope_omits_empty_fields() {
        let body = serde_json::to_value(Envelope::<()> {
            success: true,
            message: None,
            data: None,
        })
        .unwrap();
        assert_eq!(body, json!({ "success": true }));
    }
}
