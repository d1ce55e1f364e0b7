use crate::config::RenderConfig;
use crate::vouchers::notify::{NotifyError, VoucherCard, VoucherRenderer};
use log::debug;
use reqwest::Client;
use std::time::Duration;
use tokio::time::timeout;

/// Client for the voucher image service: `POST {base}/render` with the card
/// as JSON, JPEG bytes back.
#[derive(Debug, Clone)]
pub struct HttpVoucherRenderer {
    base_url: String,
    request_timeout: Duration,
    http: Client,
}

impl HttpVoucherRenderer {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration, http: Client) -> Self {
        let base = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url: base,
            request_timeout,
            http,
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            config.request_timeout,
            Client::new(),
        )
    }

    async fn dispatch_render_request(&self, card: &VoucherCard) -> Result<Vec<u8>, NotifyError> {
        let url = format!("{}/render", self.base_url);
        let response = self.http.post(url).json(card).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(NotifyError::RenderStatus { status, body });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(NotifyError::EmptyImage);
        }
        Ok(bytes.to_vec())
    }
}

#[rocket::async_trait]
impl VoucherRenderer for HttpVoucherRenderer {
    async fn render(&self, card: &VoucherCard) -> Result<Vec<u8>, NotifyError> {
        debug!("render: requesting image for voucher {}", card.code);
        match timeout(self.request_timeout, self.dispatch_render_request(card)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::RenderTimeout(self.request_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let renderer = HttpVoucherRenderer::new(
            "http://render.local/",
            Duration::from_secs(1),
            Client::new(),
        );
        assert_eq!(renderer.base_url, "http://render.local");
    }

    #[tokio::test]
    async fn unreachable_service_surfaces_http_error() {
        let renderer = HttpVoucherRenderer::new(
            "http://127.0.0.1:9",
            Duration::from_secs(5),
            Client::new(),
        );
        let card = VoucherCard {
            name: "Asha".into(),
            karma: "10".into(),
            code: "MU000001".into(),
            hashtag: "#t1".into(),
            month_week: "1/2".into(),
        };
        let err = renderer.render(&card).await.unwrap_err();
        assert!(matches!(
            err,
            NotifyError::RenderHttp(_) | NotifyError::RenderTimeout(_)
        ));
    }
}
