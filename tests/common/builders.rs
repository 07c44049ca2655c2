//! Test data builders for creating acquisition trees

use scopy_acq::acq_tree::{lock_tree, AcqNodeId, AcqNodeKind, AcqTree, FloatChannelNode, SharedAcqTree};
use scopy_acq::backend::{ChannelInfo, MockDataPattern, MockDevice, MockDeviceControl, SharedDevice};
use scopy_acq::pipeline::{SharedTopBlock, TopBlock};

/// One mock device attached to the test tree.
pub struct TestDevice {
    pub uri: String,
    pub device: SharedDevice,
    pub control: MockDeviceControl,
    pub node: AcqNodeId,
    pub channels: Vec<AcqNodeId>,
}

/// Tree with one top block and the devices added to it.
pub struct TestRig {
    pub tree: SharedAcqTree,
    pub top_node: AcqNodeId,
    pub top: SharedTopBlock,
    pub devices: Vec<TestDevice>,
}

impl TestRig {
    pub fn device(&self, uri: &str) -> &TestDevice {
        self.devices
            .iter()
            .find(|d| d.uri == uri)
            .expect("device not in rig")
    }

    pub fn root(&self) -> AcqNodeId {
        lock_tree(&self.tree).root()
    }
}

/// Builder for root -> top block -> devices -> channels
pub struct TreeBuilder {
    top_name: String,
    sample_rate: f64,
    chunk_size: Option<usize>,
    devices: Vec<(String, Vec<String>)>,
}

impl TreeBuilder {
    pub fn new(top_name: &str) -> Self {
        Self {
            top_name: top_name.to_string(),
            sample_rate: 1000.0,
            chunk_size: None,
            devices: Vec::new(),
        }
    }

    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn chunk_size(mut self, chunk: usize) -> Self {
        self.chunk_size = Some(chunk);
        self
    }

    pub fn device(mut self, uri: &str, channels: &[&str]) -> Self {
        self.devices.push((
            uri.to_string(),
            channels.iter().map(|c| c.to_string()).collect(),
        ));
        self
    }

    pub fn build(self) -> TestRig {
        let tree = AcqTree::shared();
        let top = TopBlock::shared(self.top_name.clone());
        let mut t = lock_tree(&tree);
        let root = t.root();
        let top_node = t.create(self.top_name.clone(), AcqNodeKind::TopBlock(top.clone()));
        t.add_tree_child(root, top_node).unwrap();

        let mut devices = Vec::new();
        for (uri, channels) in self.devices {
            let mut mock = MockDevice::new(uri.clone(), self.sample_rate);
            for (i, name) in channels.iter().enumerate() {
                mock = mock.with_channel(
                    name,
                    MockDataPattern::Counter {
                        step: 1.0,
                        min: (i * 1000) as f64,
                        max: (i * 1000 + 1000) as f64,
                    },
                );
            }
            if let Some(chunk) = self.chunk_size {
                mock = mock.with_chunk_size(chunk);
            }
            let control = mock.control();
            let device = SharedDevice::new(Box::new(mock));
            let node = t.create(uri.clone(), AcqNodeKind::DeviceSource(device.clone()));
            t.add_tree_child(top_node, node).unwrap();

            let mut channel_nodes = Vec::new();
            for name in channels {
                let channel = t.create(
                    name.clone(),
                    AcqNodeKind::FloatChannel(FloatChannelNode {
                        device: device.clone(),
                        info: ChannelInfo::new(name),
                    }),
                );
                t.add_tree_child(node, channel).unwrap();
                channel_nodes.push(channel);
            }
            devices.push(TestDevice {
                uri,
                device,
                control,
                node,
                channels: channel_nodes,
            });
        }
        drop(t);

        TestRig {
            tree,
            top_node,
            top,
            devices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_builder() {
        let rig = TreeBuilder::new("adc")
            .device("local:dev0", &["voltage0", "voltage1"])
            .build();

        let tree = lock_tree(&rig.tree);
        // root, top, device, two channels
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.parent(rig.top_node), Some(tree.root()));
        assert_eq!(rig.device("local:dev0").channels.len(), 2);
    }
}
