//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use edm_forms::{HttpRequest, HttpResponse, Transport, TransportError};

/// A small shop service: customers, orders and order lines.
pub const SHOP_METADATA: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<edmx:Edmx Version="4.0" xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx">
  <edmx:DataServices>
    <Schema Namespace="Shop" xmlns="http://docs.oasis-open.org/odata/ns/edm">
      <EntityType Name="Customer">
        <Key><PropertyRef Name="Id"/></Key>
        <Property Name="Id" Type="Edm.Int32" Nullable="false"/>
        <Property Name="Name" Type="Edm.String" Nullable="false" MaxLength="100">
          <Annotation Term="Org.OData.Display.V1.DisplayName" String="Customer name"/>
        </Property>
        <Property Name="Email" Type="Edm.String"/>
        <Property Name="MobilePhone" Type="Edm.String"/>
        <Property Name="Notes" Type="Edm.String" MaxLength="2000"/>
        <NavigationProperty Name="Orders" Type="Collection(Shop.Order)" Partner="Customer"/>
      </EntityType>
      <EntityType Name="Order">
        <Key><PropertyRef Name="Id"/></Key>
        <Property Name="Id" Type="Edm.Int32" Nullable="false"/>
        <Property Name="Number" Type="Edm.String" Nullable="false" MaxLength="20"/>
        <Property Name="Total" Type="Edm.Decimal" Nullable="false"/>
        <Property Name="Shipped" Type="Edm.Boolean" Nullable="false"/>
        <Property Name="OrderedAt" Type="Edm.DateTimeOffset"/>
        <Property Name="CustomerId" Type="Edm.Int32" Nullable="false"/>
        <Property Name="TrackingGuid" Type="Edm.Guid"/>
        <NavigationProperty Name="Customer" Type="Shop.Customer" Nullable="false" Partner="Orders"/>
        <NavigationProperty Name="Warehouse" Type="Shop.Warehouse"/>
        <NavigationProperty Name="Lines" Type="Collection(Shop.OrderLine)"/>
      </EntityType>
      <EntityType Name="OrderLine">
        <Key><PropertyRef Name="LineNo"/></Key>
        <Property Name="LineNo" Type="Edm.Int32" Nullable="false"/>
        <Property Name="Quantity" Type="Edm.Int32" Nullable="false"/>
        <Property Name="Receipt" Type="Edm.Binary"/>
      </EntityType>
      <Annotations Target="Shop.Order/Total">
        <Annotation Term="Core.Description" String="Order total including tax"/>
      </Annotations>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;

/// A second revision of the shop service where `Customer` gained a field.
pub const SHOP_METADATA_V2: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<edmx:Edmx Version="4.0" xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx">
  <edmx:DataServices>
    <Schema Namespace="Shop" xmlns="http://docs.oasis-open.org/odata/ns/edm">
      <EntityType Name="Customer">
        <Key><PropertyRef Name="Id"/></Key>
        <Property Name="Id" Type="Edm.Int32" Nullable="false"/>
        <Property Name="Name" Type="Edm.String" Nullable="false"/>
        <Property Name="Website" Type="Edm.String"/>
      </EntityType>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;

/// In-memory transport that answers requests from a script and counts
/// them. Answers are delayed so concurrent callers overlap.
pub struct ScriptedTransport {
    /// Remaining answers, next one last.
    responses: Mutex<Vec<(String, Duration)>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    /// Answers with `documents` in order after `delay`; the last one repeats.
    pub fn new(documents: &[&str], delay: Duration) -> Self {
        let script: Vec<(&str, Duration)> = documents.iter().map(|d| (*d, delay)).collect();
        Self::with_delays(&script)
    }

    /// Answers with each document after its own delay; the last one repeats.
    pub fn with_delays(script: &[(&str, Duration)]) -> Self {
        Self {
            responses: Mutex::new(
                script
                    .iter()
                    .rev()
                    .map(|(d, delay)| (d.to_string(), *delay))
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.pop()
            } else {
                responses.last().cloned()
            }
        };
        match next {
            Some((body, delay)) => {
                tokio::time::sleep(delay).await;
                Ok(HttpResponse::new(200, body))
            }
            None => Err(TransportError::new(request.url, "no scripted response")),
        }
    }
}
