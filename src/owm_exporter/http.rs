// owm_exporter - Prometheus metrics exporter for OpenWeatherMap
//
// Copyright 2023 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::client::WeatherProvider;
use crate::collector::Collector;
use crate::metrics::{MetricsRegistry, TEXT_CONTENT_TYPE};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Collector and registry shared by every request for metrics.
#[derive(Debug)]
pub struct RequestContext<P> {
    collector: Collector<P>,
    registry: MetricsRegistry,
}

impl<P> RequestContext<P>
where
    P: WeatherProvider,
{
    pub fn new(collector: Collector<P>, registry: MetricsRegistry) -> Self {
        RequestContext { collector, registry }
    }
}

/// Build the router serving `GET /metrics`.
pub fn app<P>(context: Arc<RequestContext<P>>) -> Router
where
    P: WeatherProvider + 'static,
{
    Router::new()
        .route("/metrics", get(text_metrics::<P>))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

/// Collect fresh weather data and render it in the text exposition format.
pub async fn text_metrics<P>(State(context): State<Arc<RequestContext<P>>>) -> Response
where
    P: WeatherProvider,
{
    let points = context.collector.collect().await;

    match context.registry.render(&points).await {
        Ok(body) => {
            tracing::debug!(
                message = "encoded prometheus metrics to text format",
                num_points = points.len(),
                num_bytes = body.len(),
            );

            (StatusCode::OK, [(CONTENT_TYPE, TEXT_CONTENT_TYPE)], body).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics", error = %e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod test {
    use super::{app, RequestContext};
    use crate::collector::test::{full_provider, FakeProvider};
    use crate::collector::Collector;
    use crate::config::{Location, Locations};
    use crate::metrics::test::{parse, sort, triples};
    use crate::metrics::MetricsRegistry;
    use reqwest::StatusCode;
    use std::net::TcpListener;
    use std::sync::Arc;

    async fn serve(context: RequestContext<FakeProvider>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app(Arc::new(context)).into_make_service());
        tokio::spawn(server);
        format!("http://{}", addr)
    }

    fn collector() -> Collector<FakeProvider> {
        let locations = Locations::new(vec![
            Location::new("PDX", 45.5, -122.6),
            Location::new("BOS", 42.36, -71.06),
        ])
        .unwrap();

        Collector::new(full_provider(), locations)
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let collector = collector();
        let registry = MetricsRegistry::new(&collector.describe()).unwrap();
        let expected = triples(&collector.collect().await);

        let base = serve(RequestContext::new(collector, registry)).await;
        let res = reqwest::get(format!("{}/metrics", base)).await.unwrap();

        assert_eq!(StatusCode::OK, res.status());
        assert!(res.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("application/openmetrics-text"));

        let body = res.text().await.unwrap();
        let mut parsed = parse(&body);
        sort(&mut parsed);

        assert_eq!(expected, parsed);
        assert!(body.contains("# HELP uv_index_current_low"));
        assert!(body.contains("weather_epoch{location=\"PDX\",event=\"sunrise\"}"));
    }

    #[tokio::test]
    async fn test_metrics_method_not_allowed() {
        let collector = collector();
        let registry = MetricsRegistry::new(&collector.describe()).unwrap();
        let base = serve(RequestContext::new(collector, registry)).await;

        let res = reqwest::Client::new()
            .post(format!("{}/metrics", base))
            .send()
            .await
            .unwrap();
        assert_eq!(StatusCode::METHOD_NOT_ALLOWED, res.status());

        let res = reqwest::get(format!("{}/", base)).await.unwrap();
        assert_eq!(StatusCode::NOT_FOUND, res.status());
    }

    #[tokio::test]
    async fn test_metrics_unregistered_points() {
        let registry = MetricsRegistry::new(&[]).unwrap();
        let base = serve(RequestContext::new(collector(), registry)).await;

        let res = reqwest::get(format!("{}/metrics", base)).await.unwrap();
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, res.status());
    }
}
