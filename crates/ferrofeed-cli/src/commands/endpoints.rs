use ferrofeed_core::endpoint::{self, EndpointCategory, ShapeClass};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

#[derive(Debug, Serialize)]
struct EndpointRow {
    id: &'static str,
    function: &'static str,
    category: EndpointCategory,
    shape: ShapeClass,
    data_type: &'static str,
    cacheable: bool,
    global: bool,
}

#[derive(Debug, Serialize)]
struct EndpointsResponseData {
    endpoints: Vec<EndpointRow>,
    count: usize,
}

pub fn run() -> Result<Value, CliError> {
    let endpoints: Vec<EndpointRow> = endpoint::catalog()
        .iter()
        .map(|spec| EndpointRow {
            id: spec.id,
            function: spec.function,
            category: spec.category,
            shape: spec.shape,
            data_type: spec.data_type,
            cacheable: spec.cacheable,
            global: spec.is_global(),
        })
        .collect();
    let count = endpoints.len();
    Ok(serde_json::to_value(EndpointsResponseData { endpoints, count })?)
}
