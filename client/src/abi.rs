//! Contract bindings.
#![allow(missing_docs)]
#![allow(clippy::pub_underscore_fields)]

use alloy::sol;

sol!(
    #[sol(rpc)]
    interface IVoting {
        struct Proposal {
            string title;
            string description;
            uint256 voteCount;
        }

        function admin() external view returns (address admin);
        function getProposals() external view returns (Proposal[] memory proposals);
        function hasVoted(uint256 proposalId, address voter)
            external
            view
            returns (bool voted);
        function createProposal(string memory title, string memory description) external;
        function vote(uint256 proposalId) external;
        function declareWinner()
            external
            view
            returns (uint256 winnerId, string memory title, uint256 voteCount);
    }
);

sol!(
    #[sol(rpc)]
    interface IErc20 {
        function allowance(address owner, address spender)
            external
            view
            returns (uint256 allowance);
        function approve(address spender, uint256 amount) external returns (bool);
    }
);
