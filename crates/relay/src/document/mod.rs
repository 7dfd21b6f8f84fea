// The single shared diagram document.
//
// The payload is opaque to the relay: it is replaced wholesale by every
// accepted update and read back verbatim. No history is kept.

use tokio::sync::RwLock;

/// Document served until the first client update arrives.
pub const PLACEHOLDER_DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL" xmlns:bpmndi="http://www.omg.org/spec/BPMN/20100524/DI" xmlns:di="http://www.omg.org/spec/DD/20100524/DI" xmlns:dc="http://www.omg.org/spec/DD/20100524/DC" id="Definitions_1" targetNamespace="http://bpmn.io/schema/bpmn">
  <bpmn:process id="Process_1" isExecutable="false">
    <bpmn:startEvent id="StartEvent_1" />
  </bpmn:process>
  <bpmndi:BPMNDiagram id="BPMNDiagram_1">
    <bpmndi:BPMNPlane id="BPMNPlane_1" bpmnElement="Process_1">
      <bpmndi:BPMNShape id="StartEvent_1_di" bpmnElement="StartEvent_1">
        <dc:Bounds x="179" y="79" width="36" height="36" />
      </bpmndi:BPMNShape>
    </bpmndi:BPMNPlane>
  </bpmndi:BPMNDiagram>
</bpmn:definitions>"#;

#[derive(Debug)]
pub struct DocumentStore {
    xml: RwLock<String>,
}

impl DocumentStore {
    pub fn new(initial: impl Into<String>) -> Self {
        Self { xml: RwLock::new(initial.into()) }
    }

    /// Overwrite the whole document.
    pub async fn replace(&self, xml: String) {
        *self.xml.write().await = xml;
    }

    pub async fn read(&self) -> String {
        self.xml.read().await.clone()
    }

    /// Payload size in bytes.
    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.xml.read().await.len()
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new(PLACEHOLDER_DOCUMENT)
    }
}
